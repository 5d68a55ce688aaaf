//! Error types for the delivery engine.
//!
//! Rejected respondent actions, unloadable content, failed calibration and
//! session lifecycle failures are separate enums so callers can decide how
//! to surface each without string matching.

use thiserror::Error;

use crate::delivery::DeliveryState;
use crate::model::{AnswerId, BlockId, QuestionId, ScaleId};

/// A respondent action the state machine refused. The machine did not
/// transition; the caller may show the message and let the respondent retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The action is not valid in the current lifecycle state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: DeliveryState,
    },

    /// `next` was called before any answer was recorded.
    #[error("please select at least one answer for question {0}")]
    NoAnswerSelected(QuestionId),

    /// `prev` was called on the first question of a block.
    #[error("already at the first question of the block")]
    AtFirstQuestion,

    /// Answers may only change for questions of the block in progress.
    #[error("question {0} is not part of the current block")]
    QuestionNotInBlock(QuestionId),

    /// The answer id is not one of the question's answers.
    #[error("answer {answer_id} does not belong to question {question_id}")]
    ForeignAnswer {
        question_id: QuestionId,
        answer_id: AnswerId,
    },

    /// A single-choice question received more than one answer.
    #[error("question {question_id} is single-choice but {count} answers were given")]
    TooManyAnswers { question_id: QuestionId, count: usize },
}

impl DeliveryError {
    /// Returns `true` if the action failed because of the respondent's input
    /// rather than because the caller drove the machine out of order.
    pub fn is_input_validation(&self) -> bool {
        !matches!(self, DeliveryError::InvalidState { .. })
    }
}

/// Structural defects that make a bundle impossible to administer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: u64 },

    #[error("question {question_id} references unknown block {block_id}")]
    UnknownBlock {
        question_id: QuestionId,
        block_id: BlockId,
    },

    #[error("answer {answer_id} references unknown question {question_id}")]
    UnknownQuestion {
        answer_id: AnswerId,
        question_id: QuestionId,
    },

    #[error("scale {scale_id} references unknown block {block_id}")]
    UnknownScaleBlock { scale_id: ScaleId, block_id: BlockId },
}

/// Reasons a theoretical norm cannot be computed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormError {
    #[error("unknown scale {0}")]
    UnknownScale(ScaleId),

    #[error("no weights found for scale {0}")]
    NoWeights(ScaleId),
}

/// Failures of a respondent session as a whole.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The token has already been used to submit results.
    #[error("this test has already been completed with the given link")]
    TokenAlreadyUsed,

    /// The content bundle is structurally broken.
    #[error("test content is invalid: {0}")]
    Content(#[from] ContentError),

    /// The collaborator could not be reached or answered with an error.
    #[error("content source error: {0:#}")]
    Source(anyhow::Error),

    /// Submission was attempted before the test was completed.
    #[error("cannot submit results while {0}")]
    NotCompleted(DeliveryState),

    /// Results for this session were already saved.
    #[error("results have already been submitted")]
    AlreadySubmitted,

    /// The collaborator rejected or failed the submission. The payload is
    /// kept and can be resubmitted.
    #[error("failed to save results: {0:#}")]
    SubmissionFailed(anyhow::Error),
}

impl SessionError {
    /// Returns `true` if the session cannot make further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::TokenAlreadyUsed
                | SessionError::Content(_)
                | SessionError::AlreadySubmitted
        )
    }
}
