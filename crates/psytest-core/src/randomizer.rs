//! Presentation order for questions and answers.
//!
//! A block's layout is materialized once per session and cached, so
//! revisiting a block or re-rendering a question never reshuffles it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::content::ContentModel;
use crate::model::{AnswerId, BlockId, QuestionId};

/// Return `items` in a uniformly random order.
pub fn shuffle<T, R: Rng + ?Sized>(mut items: Vec<T>, rng: &mut R) -> Vec<T> {
    items.shuffle(rng);
    items
}

/// A question as shown to the respondent, with its answers in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentedQuestion {
    pub question_id: QuestionId,
    pub answers: Vec<AnswerId>,
}

/// The fixed presentation of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockLayout {
    pub block_id: BlockId,
    pub questions: Vec<PresentedQuestion>,
}

impl BlockLayout {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PresentedQuestion> {
        self.questions.get(index)
    }

    pub fn contains(&self, question_id: QuestionId) -> bool {
        self.position(question_id).is_some()
    }

    pub fn position(&self, question_id: QuestionId) -> Option<usize> {
        self.questions
            .iter()
            .position(|q| q.question_id == question_id)
    }

    pub fn question_ids(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.questions.iter().map(|q| q.question_id)
    }
}

/// Per-session source of presentation order.
#[derive(Debug)]
pub struct Presentation {
    rng: StdRng,
    layouts: HashMap<BlockId, BlockLayout>,
}

impl Presentation {
    /// Fresh, unpersisted entropy for a new session.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_rng(&mut rand::rng()))
    }

    /// Reproducible order, for tests and offline tooling.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            layouts: HashMap::new(),
        }
    }

    /// Layout of `block_id`, built on first use and reused afterwards.
    ///
    /// Inactive questions are not presented. Questions keep authored order
    /// unless the block asks for randomization; the same holds for answers.
    pub fn layout(&mut self, model: &ContentModel, block_id: BlockId) -> &BlockLayout {
        let rng = &mut self.rng;
        self.layouts.entry(block_id).or_insert_with(|| {
            let (randomize_questions, randomize_answers) = model
                .block(block_id)
                .map(|b| (b.randomize_questions, b.randomize_answers))
                .unwrap_or_default();

            let mut question_ids: Vec<QuestionId> = model
                .questions_in_block(block_id)
                .iter()
                .copied()
                .filter(|&q| model.question(q).is_some_and(|q| q.is_active))
                .collect();
            if randomize_questions {
                question_ids = shuffle(question_ids, &mut *rng);
            }

            let questions = question_ids
                .into_iter()
                .map(|question_id| {
                    let mut answers = model.answers_for(question_id).to_vec();
                    if randomize_answers {
                        answers = shuffle(answers, &mut *rng);
                    }
                    PresentedQuestion {
                        question_id,
                        answers,
                    }
                })
                .collect();

            tracing::debug!(
                block_id,
                randomize_questions,
                randomize_answers,
                "materialized block layout"
            );
            BlockLayout {
                block_id,
                questions,
            }
        })
    }

    /// Layout of `block_id` if it has already been materialized.
    pub fn cached(&self, block_id: BlockId) -> Option<&BlockLayout> {
        self.layouts.get(&block_id)
    }
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new()
    }
}
