//! Immutable per-session snapshot of a test's content.
//!
//! Built once from a [`TestBundle`]; every lookup the engine performs during
//! delivery and scoring goes through the indexes held here instead of
//! re-filtering the bundle's arrays.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{ContentError, DeliveryError};
use crate::model::{
    Answer, AnswerId, Block, BlockId, Interpretation, Norm, Question, QuestionId, QuestionsType,
    Scale, ScaleId, Test, TestBundle,
};
use crate::validation::{self, AuthoringIssue, IssueKind};

/// Sparse (scale, answer) -> weight matrix with O(1) cell lookup.
#[derive(Debug, Clone, Default)]
pub struct WeightMatrix {
    cells: HashMap<(ScaleId, AnswerId), f64>,
    by_scale: BTreeMap<ScaleId, Vec<AnswerId>>,
    by_answer: HashMap<AnswerId, Vec<ScaleId>>,
}

impl WeightMatrix {
    /// Insert a cell, returning the previous value if the cell was already set.
    fn insert(&mut self, scale_id: ScaleId, answer_id: AnswerId, value: f64) -> Option<f64> {
        let previous = self.cells.insert((scale_id, answer_id), value);
        if previous.is_none() {
            self.by_scale.entry(scale_id).or_default().push(answer_id);
            self.by_answer.entry(answer_id).or_default().push(scale_id);
        }
        previous
    }

    /// Weight of `answer_id` on `scale_id`; an absent cell is 0.
    pub fn get(&self, scale_id: ScaleId, answer_id: AnswerId) -> f64 {
        self.cell(scale_id, answer_id).unwrap_or(0.0)
    }

    /// The authored cell, distinguishing "absent" from an explicit 0.
    pub fn cell(&self, scale_id: ScaleId, answer_id: AnswerId) -> Option<f64> {
        self.cells.get(&(scale_id, answer_id)).copied()
    }

    /// Answers with an authored cell on the scale, in authored order.
    pub fn answers_on(&self, scale_id: ScaleId) -> &[AnswerId] {
        self.by_scale
            .get(&scale_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Scales on which the answer has an authored cell.
    pub fn scales_of(&self, answer_id: AnswerId) -> &[ScaleId] {
        self.by_answer
            .get(&answer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Scale ids that appear in at least one cell.
    pub fn scale_ids(&self) -> impl Iterator<Item = ScaleId> + '_ {
        self.by_scale.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Indexed, read-only view of one test.
#[derive(Debug, Clone)]
pub struct ContentModel {
    test: Test,
    blocks: Vec<Block>,
    scales: BTreeMap<ScaleId, Scale>,
    scales_by_block: HashMap<BlockId, Vec<ScaleId>>,
    questions: HashMap<QuestionId, Question>,
    question_order: Vec<QuestionId>,
    questions_by_block: HashMap<BlockId, Vec<QuestionId>>,
    answers: HashMap<AnswerId, Answer>,
    answers_by_question: HashMap<QuestionId, Vec<AnswerId>>,
    weights: WeightMatrix,
    norms: Vec<Norm>,
    interpretations: Vec<Interpretation>,
    issues: Vec<AuthoringIssue>,
}

impl ContentModel {
    /// Index a bundle.
    ///
    /// Fails only on structural defects. Weight-level defects are recorded as
    /// issues and the model still loads.
    pub fn from_bundle(bundle: TestBundle) -> Result<Self, ContentError> {
        let TestBundle {
            test,
            mut blocks,
            scales,
            questions,
            answers,
            weights,
            norms,
            interpretations,
        } = bundle;

        let mut seen = HashSet::new();
        for block in &blocks {
            if !seen.insert(block.id) {
                return Err(ContentError::DuplicateId {
                    kind: "block",
                    id: block.id,
                });
            }
        }
        // Stable: equal `order` keeps authored position.
        blocks.sort_by_key(|b| b.order);
        let block_ids: HashSet<BlockId> = blocks.iter().map(|b| b.id).collect();

        let mut questions_by_block: HashMap<BlockId, Vec<QuestionId>> = HashMap::new();
        let mut question_order = Vec::with_capacity(questions.len());
        let mut question_map = HashMap::with_capacity(questions.len());
        for question in questions {
            if !block_ids.contains(&question.block_id) {
                return Err(ContentError::UnknownBlock {
                    question_id: question.id,
                    block_id: question.block_id,
                });
            }
            if question_map.contains_key(&question.id) {
                return Err(ContentError::DuplicateId {
                    kind: "question",
                    id: question.id,
                });
            }
            questions_by_block
                .entry(question.block_id)
                .or_default()
                .push(question.id);
            question_order.push(question.id);
            question_map.insert(question.id, question);
        }

        let mut answers_by_question: HashMap<QuestionId, Vec<AnswerId>> = HashMap::new();
        let mut answer_map = HashMap::with_capacity(answers.len());
        for answer in answers {
            if !question_map.contains_key(&answer.question_id) {
                return Err(ContentError::UnknownQuestion {
                    answer_id: answer.id,
                    question_id: answer.question_id,
                });
            }
            if answer_map.contains_key(&answer.id) {
                return Err(ContentError::DuplicateId {
                    kind: "answer",
                    id: answer.id,
                });
            }
            answers_by_question
                .entry(answer.question_id)
                .or_default()
                .push(answer.id);
            answer_map.insert(answer.id, answer);
        }

        let block_of_answer = |answer_id: AnswerId| -> Option<BlockId> {
            let answer = answer_map.get(&answer_id)?;
            question_map.get(&answer.question_id).map(|q| q.block_id)
        };

        // Bundles without a scale list get scales inferred from the weights.
        let explicit_scales = !scales.is_empty();
        let mut scale_map = BTreeMap::new();
        for scale in scales {
            if !block_ids.contains(&scale.block_id) {
                return Err(ContentError::UnknownScaleBlock {
                    scale_id: scale.id,
                    block_id: scale.block_id,
                });
            }
            if scale_map.contains_key(&scale.id) {
                return Err(ContentError::DuplicateId {
                    kind: "scale",
                    id: scale.id,
                });
            }
            scale_map.insert(scale.id, scale);
        }
        if !explicit_scales {
            for weight in &weights {
                if scale_map.contains_key(&weight.scale_id) {
                    continue;
                }
                if let Some(block_id) = block_of_answer(weight.answer_id) {
                    scale_map.insert(
                        weight.scale_id,
                        Scale {
                            id: weight.scale_id,
                            scale_type: None,
                            pole1: String::new(),
                            pole2: None,
                            block_id,
                        },
                    );
                }
            }
        }

        let mut scales_by_block: HashMap<BlockId, Vec<ScaleId>> = HashMap::new();
        for scale in scale_map.values() {
            scales_by_block
                .entry(scale.block_id)
                .or_default()
                .push(scale.id);
        }

        let mut issues = Vec::new();
        let mut matrix = WeightMatrix::default();
        for weight in weights {
            let Some(answer_block) = block_of_answer(weight.answer_id) else {
                issues.push(AuthoringIssue::defect(
                    IssueKind::DanglingAnswer {
                        answer_id: weight.answer_id,
                    },
                    Some(weight.scale_id),
                    None,
                ));
                continue;
            };
            let question_id = answer_map.get(&weight.answer_id).map(|a| a.question_id);
            let Some(scale) = scale_map.get(&weight.scale_id) else {
                issues.push(AuthoringIssue::defect(
                    IssueKind::DanglingScale {
                        answer_id: weight.answer_id,
                    },
                    Some(weight.scale_id),
                    question_id,
                ));
                continue;
            };
            if scale.block_id != answer_block {
                issues.push(AuthoringIssue::defect(
                    IssueKind::CrossBlockWeight {
                        answer_id: weight.answer_id,
                        answer_block,
                        scale_block: scale.block_id,
                    },
                    Some(weight.scale_id),
                    question_id,
                ));
            }
            if matrix
                .insert(weight.scale_id, weight.answer_id, weight.value)
                .is_some()
            {
                issues.push(AuthoringIssue::defect(
                    IssueKind::DuplicateWeight {
                        answer_id: weight.answer_id,
                    },
                    Some(weight.scale_id),
                    question_id,
                ));
            }
        }

        let mut model = Self {
            test,
            blocks,
            scales: scale_map,
            scales_by_block,
            questions: question_map,
            question_order,
            questions_by_block,
            answers: answer_map,
            answers_by_question,
            weights: matrix,
            norms,
            interpretations,
            issues,
        };
        let authoring = validation::validate_questions(&model);
        model.issues.extend(authoring);

        for issue in &model.issues {
            tracing::debug!(scale = ?issue.scale_id, question = ?issue.question_id, "{issue}");
        }
        Ok(model)
    }

    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Blocks in delivery order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_at(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn block(&self, block_id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    pub fn scale(&self, scale_id: ScaleId) -> Option<&Scale> {
        self.scales.get(&scale_id)
    }

    /// All scales, ordered by id.
    pub fn scales(&self) -> impl Iterator<Item = &Scale> + '_ {
        self.scales.values()
    }

    pub fn scales_in_block(&self, block_id: BlockId) -> &[ScaleId] {
        self.scales_by_block
            .get(&block_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn question(&self, question_id: QuestionId) -> Option<&Question> {
        self.questions.get(&question_id)
    }

    /// Every question id of the test, in authored order.
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_order
    }

    /// Question ids of one block, in authored order.
    pub fn questions_in_block(&self, block_id: BlockId) -> &[QuestionId] {
        self.questions_by_block
            .get(&block_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn answer(&self, answer_id: AnswerId) -> Option<&Answer> {
        self.answers.get(&answer_id)
    }

    /// Answer ids of one question, in authored order.
    pub fn answers_for(&self, question_id: QuestionId) -> &[AnswerId] {
        self.answers_by_question
            .get(&question_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The block a question belongs to.
    pub fn block_of_question(&self, question_id: QuestionId) -> Option<&Block> {
        let question = self.questions.get(&question_id)?;
        self.block(question.block_id)
    }

    pub fn question_of_answer(&self, answer_id: AnswerId) -> Option<QuestionId> {
        self.answers.get(&answer_id).map(|a| a.question_id)
    }

    /// Check a selection for one question and collapse duplicate ids.
    ///
    /// Every answer must belong to the question, and single-choice questions
    /// accept at most one answer.
    pub fn check_selection(
        &self,
        question_id: QuestionId,
        answer_ids: &[AnswerId],
    ) -> Result<Vec<AnswerId>, DeliveryError> {
        let mut selection: Vec<AnswerId> = Vec::with_capacity(answer_ids.len());
        for &answer_id in answer_ids {
            if self.question_of_answer(answer_id) != Some(question_id) {
                return Err(DeliveryError::ForeignAnswer {
                    question_id,
                    answer_id,
                });
            }
            if !selection.contains(&answer_id) {
                selection.push(answer_id);
            }
        }

        let mode = self
            .block_of_question(question_id)
            .map(|b| b.questions_type)
            .unwrap_or_default();
        if mode == QuestionsType::SingleChoice && selection.len() > 1 {
            return Err(DeliveryError::TooManyAnswers {
                question_id,
                count: selection.len(),
            });
        }
        Ok(selection)
    }

    pub fn weights(&self) -> &WeightMatrix {
        &self.weights
    }

    pub fn norms(&self) -> &[Norm] {
        &self.norms
    }

    pub fn interpretations(&self) -> &[Interpretation] {
        &self.interpretations
    }

    /// All authoring issues found while indexing.
    pub fn issues(&self) -> &[AuthoringIssue] {
        &self.issues
    }

    pub fn issues_for_scale(&self, scale_id: ScaleId) -> impl Iterator<Item = &AuthoringIssue> {
        self.issues
            .iter()
            .filter(move |i| i.scale_id == Some(scale_id))
    }

    /// Returns `true` if any defect touches the scale, making its numbers suspect.
    pub fn is_scale_suspect(&self, scale_id: ScaleId) -> bool {
        self.issues_for_scale(scale_id).any(AuthoringIssue::is_defect)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::*;

    pub fn block(id: BlockId, order: i64) -> Block {
        Block {
            id,
            name: format!("Block {id}"),
            order,
            has_time_limit: false,
            time_limit: 0,
            instructions: String::new(),
            randomize_questions: false,
            randomize_answers: false,
            questions_type: QuestionsType::SingleChoice,
            number_of_answers: 0,
            number_of_questions: 0,
        }
    }

    pub fn scale(id: ScaleId, block_id: BlockId, scale_type: ScaleType) -> Scale {
        Scale {
            id,
            scale_type: Some(scale_type),
            pole1: format!("Pole {id}"),
            pole2: None,
            block_id,
        }
    }

    pub fn question(id: QuestionId, block_id: BlockId) -> Question {
        Question {
            id,
            text: format!("Question {id}"),
            image_url: None,
            is_active: true,
            block_id,
        }
    }

    pub fn answer(id: AnswerId, question_id: QuestionId) -> Answer {
        Answer {
            id,
            text: format!("Answer {id}"),
            question_id,
        }
    }

    pub fn weight(answer_id: AnswerId, scale_id: ScaleId, value: f64) -> Weight {
        Weight {
            answer_id,
            scale_id,
            value,
        }
    }

    pub fn test() -> Test {
        Test {
            id: Some(1),
            title: "Fixture".into(),
            ..Default::default()
        }
    }

    /// Two blocks, two questions each, three answers per question.
    ///
    /// Block 1 (single-choice): unipolar scale 10 and bipolar scale 11.
    /// Answers 1001 and 1012 are the neutral (all-zero) answers.
    /// Block 2 (multi-choice): gradual scale 20, no neutral answers.
    pub fn two_block_bundle() -> TestBundle {
        let mut b2 = block(2, 2);
        b2.questions_type = QuestionsType::MultiChoice;
        TestBundle {
            test: test(),
            blocks: vec![b2, block(1, 1)],
            scales: vec![
                scale(10, 1, ScaleType::Unipolar),
                scale(11, 1, ScaleType::Bipolar),
                scale(20, 2, ScaleType::Gradual),
            ],
            questions: vec![question(100, 1), question(101, 1), question(200, 2), question(201, 2)],
            answers: vec![
                answer(1000, 100),
                answer(1001, 100),
                answer(1002, 100),
                answer(1010, 101),
                answer(1011, 101),
                answer(1012, 101),
                answer(2000, 200),
                answer(2001, 200),
                answer(2002, 200),
                answer(2010, 201),
                answer(2011, 201),
                answer(2012, 201),
            ],
            weights: vec![
                weight(1000, 10, 2.0),
                weight(1001, 10, 0.0),
                weight(1000, 11, 0.0),
                weight(1001, 11, 0.0),
                weight(1010, 11, 1.0),
                weight(1011, 11, -1.0),
                weight(1012, 11, 0.0),
                weight(2000, 20, 1.0),
                weight(2001, 20, 2.0),
                weight(2002, 20, 3.0),
                weight(2010, 20, 1.0),
                weight(2011, 20, 2.0),
                weight(2012, 20, 3.0),
            ],
            norms: vec![],
            interpretations: vec![],
        }
    }

    pub fn two_block_model() -> super::ContentModel {
        super::ContentModel::from_bundle(two_block_bundle()).unwrap()
    }
}
