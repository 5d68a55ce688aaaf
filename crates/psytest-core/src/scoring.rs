//! Scoring engine: raw per-scale scores from the weight matrix.
//!
//! Scoring is a pure function of the answers and the weights. Unipolar and
//! bipolar scales sum the weights of every selected answer. A gradual scale
//! takes one ranked contribution per question and sums those across the
//! questions. Bipolar exclusivity is enforced when answers are selected, so
//! it is not re-checked here.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::content::ContentModel;
use crate::model::{AnswerId, QuestionId, ScaleId, ScaleType};
use crate::validation::{AuthoringIssue, IssueKind};

/// The raw score of one scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleScore {
    pub scale_id: ScaleId,
    pub scale_type: Option<ScaleType>,
    pub raw: f64,
    /// Questions that contributed a nonzero amount.
    pub contributing_questions: usize,
    /// The scale's weights have authoring defects; treat `raw` with care.
    pub suspect: bool,
    pub issues: Vec<AuthoringIssue>,
}

/// Raw scores of every scale of a test, ordered by scale id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreSheet {
    scores: BTreeMap<ScaleId, ScaleScore>,
}

impl ScoreSheet {
    /// Score `answers` against every scale of `model`.
    pub fn compute(model: &ContentModel, answers: &BTreeMap<QuestionId, Vec<AnswerId>>) -> Self {
        let scores = model
            .scales()
            .map(|scale| {
                let score = score_scale(model, scale.id, scale.scale_type, answers);
                (scale.id, score)
            })
            .collect();
        Self { scores }
    }

    pub fn get(&self, scale_id: ScaleId) -> Option<&ScaleScore> {
        self.scores.get(&scale_id)
    }

    pub fn raw(&self, scale_id: ScaleId) -> Option<f64> {
        self.get(scale_id).map(|s| s.raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScaleScore> + '_ {
        self.scores.values()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn suspect_scales(&self) -> impl Iterator<Item = ScaleId> + '_ {
        self.scores.values().filter(|s| s.suspect).map(|s| s.scale_id)
    }
}

fn score_scale(
    model: &ContentModel,
    scale_id: ScaleId,
    scale_type: Option<ScaleType>,
    answers: &BTreeMap<QuestionId, Vec<AnswerId>>,
) -> ScaleScore {
    let weights = model.weights();
    let gradual = scale_type == Some(ScaleType::Gradual);
    let mut issues: Vec<AuthoringIssue> = model.issues_for_scale(scale_id).cloned().collect();
    let mut raw = 0.0;
    let mut contributing_questions = 0;

    for (&question_id, selected) in answers {
        let mut distinct = selected.clone();
        distinct.sort_unstable();
        distinct.dedup();

        let contribution = if gradual {
            let ranked: Vec<f64> = distinct
                .iter()
                .filter_map(|&a| weights.cell(scale_id, a))
                .collect();
            if ranked.len() > 1 {
                issues.push(AuthoringIssue::warning(
                    IssueKind::MultipleGradualSelections {
                        count: ranked.len(),
                    },
                    Some(scale_id),
                    Some(question_id),
                ));
            }
            ranked.into_iter().reduce(f64::max).unwrap_or(0.0)
        } else {
            distinct.iter().map(|&a| weights.get(scale_id, a)).sum()
        };

        if contribution != 0.0 {
            contributing_questions += 1;
        }
        raw += contribution;
    }

    let suspect = model.is_scale_suspect(scale_id);
    if suspect {
        tracing::warn!(scale_id, "scoring a scale with authoring defects");
    }

    ScaleScore {
        scale_id,
        scale_type,
        raw,
        contributing_questions,
        suspect,
        issues,
    }
}
