//! Authoring-time checks of the weight matrix.
//!
//! Nothing here blocks delivery. `Defect` issues make the affected scale's
//! scores and norms suspect; `Warning` issues point at authoring choices the
//! runner tolerates.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::content::ContentModel;
use crate::model::{AnswerId, BlockId, QuestionId, QuestionsType, ScaleId, ScaleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Defect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    /// A weight row names an answer that does not exist.
    DanglingAnswer { answer_id: AnswerId },
    /// A weight row names a scale that does not exist.
    DanglingScale { answer_id: AnswerId },
    /// The answer and the scale live in different blocks.
    CrossBlockWeight {
        answer_id: AnswerId,
        answer_block: BlockId,
        scale_block: BlockId,
    },
    /// The same (scale, answer) pair appears more than once.
    DuplicateWeight { answer_id: AnswerId },
    /// A gradual scale ranks two answers of one question equally.
    GradualDuplicateWeights { value: f64 },
    /// A unipolar scale keys several answers of a single-choice question.
    TooManyKeysForSingleChoice { count: usize },
    /// A single-choice question is keyed on several scales.
    SingleChoiceMultipleScales { count: usize },
    /// A question participates in several gradual scales.
    MultipleGradualScales { count: usize },
    /// A scale has no nonzero weight at all.
    ScaleWithoutWeights,
    /// No answer of the question is weighted 0 on every scale it touches.
    MissingNeutralAnswer,
    /// Several answers qualify as the neutral answer.
    AmbiguousNeutralAnswer { count: usize },
    /// A question has more answers than its block's `numberOfAnswers`.
    TooManyAnswers { count: usize, limit: u32 },
    /// A response selected several answers of one question that rank on the
    /// same gradual scale. Only the highest-ranked one is scored.
    MultipleGradualSelections { count: usize },
}

/// A single finding, located by scale and/or question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthoringIssue {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub scale_id: Option<ScaleId>,
    pub question_id: Option<QuestionId>,
}

impl AuthoringIssue {
    pub fn defect(kind: IssueKind, scale_id: Option<ScaleId>, question_id: Option<QuestionId>) -> Self {
        Self {
            severity: Severity::Defect,
            kind,
            scale_id,
            question_id,
        }
    }

    pub fn warning(
        kind: IssueKind,
        scale_id: Option<ScaleId>,
        question_id: Option<QuestionId>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            scale_id,
            question_id,
        }
    }

    pub fn is_defect(&self) -> bool {
        self.severity == Severity::Defect
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::DanglingAnswer { answer_id } => {
                write!(f, "weight references unknown answer {answer_id}")
            }
            IssueKind::DanglingScale { answer_id } => {
                write!(f, "weight on answer {answer_id} references an unknown scale")
            }
            IssueKind::CrossBlockWeight {
                answer_id,
                answer_block,
                scale_block,
            } => write!(
                f,
                "answer {answer_id} (block {answer_block}) is weighted on a scale of block {scale_block}"
            ),
            IssueKind::DuplicateWeight { answer_id } => {
                write!(f, "answer {answer_id} has more than one weight on the same scale")
            }
            IssueKind::TooManyAnswers { count, limit } => {
                write!(f, "question has {count} answers, its block allows {limit}")
            }
            IssueKind::GradualDuplicateWeights { value } => {
                write!(f, "gradual weights must be distinct, {value} appears twice")
            }
            IssueKind::TooManyKeysForSingleChoice { count } => {
                write!(f, "{count} answers are keyed on a unipolar scale in a single-choice question")
            }
            IssueKind::SingleChoiceMultipleScales { count } => {
                write!(f, "single-choice question is keyed on {count} scales")
            }
            IssueKind::MultipleGradualScales { count } => {
                write!(f, "question participates in {count} gradual scales")
            }
            IssueKind::ScaleWithoutWeights => write!(f, "scale has no weights assigned"),
            IssueKind::MissingNeutralAnswer => {
                write!(f, "no zero-weighted answer to use when the question is skipped")
            }
            IssueKind::AmbiguousNeutralAnswer { count } => {
                write!(f, "{count} zero-weighted answers, the skip fallback is ambiguous")
            }
            IssueKind::MultipleGradualSelections { count } => {
                write!(f, "{count} ranked answers selected, scored the highest")
            }
        }
    }
}

impl fmt::Display for AuthoringIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Defect => "defect",
        };
        write!(f, "{severity}")?;
        if let Some(scale) = self.scale_id {
            write!(f, " [scale {scale}]")?;
        }
        if let Some(question) = self.question_id {
            write!(f, " [question {question}]")?;
        }
        write!(f, ": {}", self.kind)
    }
}

/// All issues of a model: weight-level defects found while indexing plus the
/// per-question checks below.
pub fn validate_content(model: &ContentModel) -> Vec<AuthoringIssue> {
    model.issues().to_vec()
}

/// Answers of `question_id` that carry at least one weight cell, all of them 0.
///
/// Exactly one such answer is the question's neutral answer.
pub fn neutral_answers(model: &ContentModel, question_id: QuestionId) -> Vec<AnswerId> {
    let weights = model.weights();
    model
        .answers_for(question_id)
        .iter()
        .copied()
        .filter(|&answer_id| {
            let scales = weights.scales_of(answer_id);
            !scales.is_empty() && scales.iter().all(|&s| weights.get(s, answer_id) == 0.0)
        })
        .collect()
}

/// Per-question and per-scale authoring checks.
pub(crate) fn validate_questions(model: &ContentModel) -> Vec<AuthoringIssue> {
    let mut issues = Vec::new();
    let weights = model.weights();

    for block in model.blocks() {
        let single_choice = block.questions_type == QuestionsType::SingleChoice;
        let block_scales = model.scales_in_block(block.id);

        for &question_id in model.questions_in_block(block.id) {
            let answers = model.answers_for(question_id);
            if block.number_of_answers > 0 && answers.len() > block.number_of_answers as usize {
                issues.push(AuthoringIssue::defect(
                    IssueKind::TooManyAnswers {
                        count: answers.len(),
                        limit: block.number_of_answers,
                    },
                    None,
                    Some(question_id),
                ));
            }
            let mut keyed_scales = BTreeSet::new();
            let mut gradual_scales = BTreeSet::new();

            for &scale_id in block_scales {
                let Some(scale) = model.scale(scale_id) else {
                    continue;
                };
                let nonzero: Vec<f64> = answers
                    .iter()
                    .map(|&a| weights.get(scale_id, a))
                    .filter(|&v| v != 0.0)
                    .collect();
                if nonzero.is_empty() {
                    continue;
                }

                match scale.scale_type {
                    Some(ScaleType::Gradual) => {
                        gradual_scales.insert(scale_id);
                        if let Some(value) = first_duplicate(&nonzero) {
                            issues.push(AuthoringIssue::defect(
                                IssueKind::GradualDuplicateWeights { value },
                                Some(scale_id),
                                Some(question_id),
                            ));
                        }
                    }
                    Some(ScaleType::Unipolar) => {
                        keyed_scales.insert(scale_id);
                        let count = nonzero.iter().filter(|&&v| v > 0.0).count();
                        if single_choice && count > 1 {
                            issues.push(AuthoringIssue::warning(
                                IssueKind::TooManyKeysForSingleChoice { count },
                                Some(scale_id),
                                Some(question_id),
                            ));
                        }
                    }
                    Some(ScaleType::Bipolar) | None => {
                        keyed_scales.insert(scale_id);
                    }
                }
            }

            if single_choice && keyed_scales.len() > 1 {
                issues.push(AuthoringIssue::warning(
                    IssueKind::SingleChoiceMultipleScales {
                        count: keyed_scales.len(),
                    },
                    None,
                    Some(question_id),
                ));
            }
            if gradual_scales.len() > 1 {
                issues.push(AuthoringIssue::warning(
                    IssueKind::MultipleGradualScales {
                        count: gradual_scales.len(),
                    },
                    None,
                    Some(question_id),
                ));
            }

            match neutral_answers(model, question_id).len() {
                1 => {}
                0 => issues.push(AuthoringIssue::warning(
                    IssueKind::MissingNeutralAnswer,
                    None,
                    Some(question_id),
                )),
                count => issues.push(AuthoringIssue::warning(
                    IssueKind::AmbiguousNeutralAnswer { count },
                    None,
                    Some(question_id),
                )),
            }
        }
    }

    for scale in model.scales() {
        let has_weight = weights
            .answers_on(scale.id)
            .iter()
            .any(|&a| weights.get(scale.id, a) != 0.0);
        if !has_weight {
            issues.push(AuthoringIssue::warning(
                IssueKind::ScaleWithoutWeights,
                Some(scale.id),
                None,
            ));
        }
    }

    issues
}

fn first_duplicate(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
}
