//! Theoretical norm calibration.
//!
//! A scale's norm is derived from the range its weights can reach: the mean
//! sits in the middle of the range and the standard deviation spans it in
//! six steps (±3σ).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::content::ContentModel;
use crate::error::NormError;
use crate::model::{Norm, QuestionId, ScaleId, ScaleType};

/// The `type` recorded on norms produced here.
pub const THEORETICAL_NORM_TYPE: &str = "theoretical";

/// How a scale's weights aggregate into its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NormStyle {
    /// Unipolar and bipolar: every weight may add up.
    Sum,
    /// One ranked weight per question.
    Gradual,
}

/// The calibrated range and norm of one scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TheoreticalNorm {
    pub scale_id: ScaleId,
    pub style: NormStyle,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub suspect: bool,
}

impl TheoreticalNorm {
    /// The norm as the authoring tool stores it, rounded to one decimal.
    pub fn to_norm(&self) -> Norm {
        Norm {
            scale_id: self.scale_id,
            mean: round1(self.mean),
            std_dev: round1(self.std_dev),
            norm_type: THEORETICAL_NORM_TYPE.to_string(),
        }
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Decide how `scale_id` aggregates.
///
/// A declared scale type wins. Without one, a scale is gradual when some
/// question carries more than one distinct positive weight on it.
pub fn detect_style(model: &ContentModel, scale_id: ScaleId) -> NormStyle {
    match model.scale(scale_id).and_then(|s| s.scale_type) {
        Some(ScaleType::Gradual) => NormStyle::Gradual,
        Some(ScaleType::Unipolar | ScaleType::Bipolar) => NormStyle::Sum,
        None => {
            let gradual = weights_by_question(model, scale_id).values().any(|values| {
                let mut positive: Vec<f64> = values.iter().copied().filter(|&v| v > 0.0).collect();
                positive.sort_by(f64::total_cmp);
                positive.dedup();
                positive.len() > 1
            });
            if gradual {
                NormStyle::Gradual
            } else {
                NormStyle::Sum
            }
        }
    }
}

/// Calibrate the theoretical norm of one scale.
pub fn calibrate(model: &ContentModel, scale_id: ScaleId) -> Result<TheoreticalNorm, NormError> {
    if model.scale(scale_id).is_none() {
        return Err(NormError::UnknownScale(scale_id));
    }
    let weights = model.weights();
    let values: Vec<f64> = weights
        .answers_on(scale_id)
        .iter()
        .filter_map(|&a| weights.cell(scale_id, a))
        .collect();
    if values.is_empty() {
        return Err(NormError::NoWeights(scale_id));
    }

    let style = detect_style(model, scale_id);
    let (min, max): (f64, f64) = match style {
        NormStyle::Sum => (
            values.iter().filter(|&&v| v <= 0.0).sum(),
            values.iter().filter(|&&v| v > 0.0).sum(),
        ),
        NormStyle::Gradual => weights_by_question(model, scale_id).values().fold(
            (0.0, 0.0),
            |(min, max), group| {
                let lo = group.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = group.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min + lo, max + hi)
            },
        ),
    };

    let norm = TheoreticalNorm {
        scale_id,
        style,
        min,
        max,
        mean: (min + max) / 2.0,
        std_dev: (max - min) / 6.0,
        suspect: model.is_scale_suspect(scale_id),
    };
    tracing::debug!(scale_id, ?style, min, max, "calibrated theoretical norm");
    Ok(norm)
}

/// Calibrate every scale of the model, keyed by scale id.
pub fn calibrate_all(model: &ContentModel) -> BTreeMap<ScaleId, Result<TheoreticalNorm, NormError>> {
    model
        .scales()
        .map(|s| (s.id, calibrate(model, s.id)))
        .collect()
}

fn weights_by_question(model: &ContentModel, scale_id: ScaleId) -> BTreeMap<QuestionId, Vec<f64>> {
    let weights = model.weights();
    let mut groups: BTreeMap<QuestionId, Vec<f64>> = BTreeMap::new();
    for &answer_id in weights.answers_on(scale_id) {
        let (Some(question_id), Some(value)) = (
            model.question_of_answer(answer_id),
            weights.cell(scale_id, answer_id),
        ) else {
            continue;
        };
        groups.entry(question_id).or_default().push(value);
    }
    groups
}
