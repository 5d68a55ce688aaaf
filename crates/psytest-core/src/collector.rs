//! Respondent answers keyed by question.
//!
//! The collector does not care where in the flow an answer was given:
//! navigating back and forth never loses a selection. Before submission the
//! map is widened over every question of the test.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::content::ContentModel;
use crate::model::{AnswerId, QuestionId, QuestionsType, ScaleType};
use crate::validation::neutral_answers;

/// Per-question selected answer ids.
#[derive(Debug, Clone, Default)]
pub struct AnswerCollector {
    answers: HashMap<QuestionId, Vec<AnswerId>>,
}

impl AnswerCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection for `question_id`.
    pub fn save(&mut self, question_id: QuestionId, answer_ids: Vec<AnswerId>) {
        self.answers.insert(question_id, answer_ids);
    }

    /// The current selection, empty if the question was never answered.
    pub fn get(&self, question_id: QuestionId) -> &[AnswerId] {
        self.answers
            .get(&question_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_answered(&self, question_id: QuestionId) -> bool {
        !self.get(question_id).is_empty()
    }

    /// Number of `question_ids` with a non-empty selection.
    pub fn answered_count(&self, question_ids: impl IntoIterator<Item = QuestionId>) -> usize {
        question_ids
            .into_iter()
            .filter(|&q| self.is_answered(q))
            .count()
    }

    /// Apply a click on `answer_id` and return the resulting selection.
    ///
    /// Single-choice questions behave like radio buttons. Multi-choice
    /// questions toggle the answer, and selecting an answer keyed on a
    /// bipolar scale drops any selected answer keyed on the opposite pole.
    pub fn toggle(
        &mut self,
        model: &ContentModel,
        mode: QuestionsType,
        question_id: QuestionId,
        answer_id: AnswerId,
    ) -> &[AnswerId] {
        let selection = self.answers.entry(question_id).or_default();
        match mode {
            QuestionsType::SingleChoice => {
                selection.clear();
                selection.push(answer_id);
            }
            QuestionsType::MultiChoice => {
                if let Some(pos) = selection.iter().position(|&a| a == answer_id) {
                    selection.remove(pos);
                } else {
                    selection.retain(|&other| !opposite_poles(model, answer_id, other));
                    selection.push(answer_id);
                }
            }
        }
        selection
    }

    /// Selections over every question of the test, filling gaps with the
    /// question's neutral answer when exactly one exists.
    pub fn widen(&self, model: &ContentModel) -> WidenedAnswers {
        let mut answers = BTreeMap::new();
        let mut gaps = Vec::new();

        for &question_id in model.question_ids() {
            let selected = self.get(question_id);
            if !selected.is_empty() {
                answers.insert(question_id, selected.to_vec());
                continue;
            }

            let neutral = neutral_answers(model, question_id);
            if let [answer_id] = neutral.as_slice() {
                tracing::debug!(question_id, answer_id, "substituting neutral answer");
                answers.insert(question_id, vec![*answer_id]);
            } else {
                tracing::warn!(
                    question_id,
                    candidates = neutral.len(),
                    "unanswered question has no unique neutral answer"
                );
                answers.insert(question_id, Vec::new());
                gaps.push(GapWarning {
                    question_id,
                    neutral_candidates: neutral.len(),
                });
            }
        }

        WidenedAnswers { answers, gaps }
    }
}

/// Whether `a` and `b` pull in opposite directions on a shared bipolar scale.
fn opposite_poles(model: &ContentModel, a: AnswerId, b: AnswerId) -> bool {
    let weights = model.weights();
    weights.scales_of(a).iter().any(|&scale_id| {
        let bipolar = model
            .scale(scale_id)
            .is_some_and(|s| s.scale_type == Some(ScaleType::Bipolar));
        bipolar && weights.get(scale_id, a) * weights.get(scale_id, b) < 0.0
    })
}

/// An unanswered question left empty in the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapWarning {
    pub question_id: QuestionId,
    /// How many zero-weighted answers qualified (0 or more than 1).
    pub neutral_candidates: usize,
}

impl fmt::Display for GapWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.neutral_candidates == 0 {
            write!(
                f,
                "question {} was not answered and has no neutral answer",
                self.question_id
            )
        } else {
            write!(
                f,
                "question {} was not answered and has {} candidate neutral answers",
                self.question_id, self.neutral_candidates
            )
        }
    }
}

/// Answers covering every question of the test.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WidenedAnswers {
    pub answers: BTreeMap<QuestionId, Vec<AnswerId>>,
    pub gaps: Vec<GapWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::*;
    use proptest::prelude::*;

    #[test]
    fn unanswered_is_empty() {
        let collector = AnswerCollector::new();
        assert!(collector.get(100).is_empty());
        assert!(!collector.is_answered(100));
    }

    #[test]
    fn save_replaces_previous_selection() {
        let mut collector = AnswerCollector::new();
        collector.save(200, vec![2000, 2001]);
        collector.save(200, vec![2002]);
        assert_eq!(collector.get(200), &[2002]);
    }

    #[test]
    fn single_choice_toggle_is_a_radio() {
        let model = two_block_model();
        let mut collector = AnswerCollector::new();
        collector.toggle(&model, QuestionsType::SingleChoice, 101, 1010);
        let selection = collector.toggle(&model, QuestionsType::SingleChoice, 101, 1011);
        assert_eq!(selection, &[1011]);
    }

    #[test]
    fn multi_choice_toggle_adds_and_removes() {
        let model = two_block_model();
        let mut collector = AnswerCollector::new();
        collector.toggle(&model, QuestionsType::MultiChoice, 200, 2000);
        collector.toggle(&model, QuestionsType::MultiChoice, 200, 2002);
        assert_eq!(collector.get(200), &[2000, 2002]);
        collector.toggle(&model, QuestionsType::MultiChoice, 200, 2000);
        assert_eq!(collector.get(200), &[2002]);
    }

    #[test]
    fn opposite_bipolar_pole_is_dropped_in_multi_choice() {
        let model = two_block_model();
        let mut collector = AnswerCollector::new();
        collector.toggle(&model, QuestionsType::MultiChoice, 101, 1010);
        collector.toggle(&model, QuestionsType::MultiChoice, 101, 1012);
        assert_eq!(collector.get(101), &[1010, 1012]);
        collector.toggle(&model, QuestionsType::MultiChoice, 101, 1011);
        assert_eq!(collector.get(101), &[1012, 1011]);
    }

    #[test]
    fn widen_fills_neutral_answers() {
        let model = two_block_model();
        let mut collector = AnswerCollector::new();
        collector.save(100, vec![1000]);
        collector.save(200, vec![2001]);

        let widened = collector.widen(&model);
        assert_eq!(widened.answers.len(), model.question_ids().len());
        assert_eq!(widened.answers[&100], vec![1000]);
        assert_eq!(widened.answers[&101], vec![1012]);
        assert_eq!(widened.answers[&200], vec![2001]);
        assert!(widened.answers[&201].is_empty());
        assert_eq!(
            widened.gaps,
            vec![GapWarning {
                question_id: 201,
                neutral_candidates: 0
            }]
        );
    }

    #[test]
    fn explicitly_empty_selection_counts_as_unanswered() {
        let model = two_block_model();
        let mut collector = AnswerCollector::new();
        collector.save(100, vec![]);
        assert_eq!(collector.widen(&model).answers[&100], vec![1001]);
    }

    #[test]
    fn ambiguous_neutral_answer_is_a_gap() {
        let mut bundle = two_block_bundle();
        bundle.weights.push(weight(1002, 10, 0.0));
        let model = ContentModel::from_bundle(bundle).unwrap();
        let widened = AnswerCollector::new().widen(&model);
        assert!(widened.answers[&100].is_empty());
        assert!(widened.gaps.contains(&GapWarning {
            question_id: 100,
            neutral_candidates: 2
        }));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Save(QuestionId, Vec<AnswerId>),
        Navigate,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..5, prop::collection::vec(0u64..20, 0..4))
                .prop_map(|(q, answers)| Op::Save(q, answers)),
            Just(Op::Navigate),
        ]
    }

    proptest! {
        #[test]
        fn last_save_wins(ops in prop::collection::vec(op(), 0..60)) {
            let mut collector = AnswerCollector::new();
            let mut expected: HashMap<QuestionId, Vec<AnswerId>> = HashMap::new();
            for op in ops {
                match op {
                    Op::Save(q, answers) => {
                        collector.save(q, answers.clone());
                        expected.insert(q, answers);
                    }
                    // Navigation does not touch the collector.
                    Op::Navigate => {}
                }
            }
            for q in 0u64..5 {
                let want = expected.get(&q).cloned().unwrap_or_default();
                prop_assert_eq!(collector.get(q), want.as_slice());
            }
        }
    }
}
