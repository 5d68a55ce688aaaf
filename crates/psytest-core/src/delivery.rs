//! Delivery state machine.
//!
//! Sequences a respondent through the blocks of a test and the questions of
//! each block. Every respondent event has exactly one entry point
//! (`start_test`, `start_block`, `next`, `prev`, `timeout`, `save_answers`,
//! `toggle_answer`) plus `on_timer` for countdown events. A rejected action
//! never changes state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::collector::{AnswerCollector, WidenedAnswers};
use crate::content::ContentModel;
use crate::error::DeliveryError;
use crate::model::{AnswerId, Block, QuestionId, QuestionsType};
use crate::randomizer::{BlockLayout, Presentation, PresentedQuestion};
use crate::timer::{TimerEvent, TimerEventKind};
use crate::traits::BlockTimer;

/// Seconds per authored time-limit unit.
///
/// Block time limits are authored in minutes but have always been counted
/// down as `time_limit * 10` seconds. The factor is kept as configuration.
pub const DEFAULT_TIME_LIMIT_MULTIPLIER: u32 = 10;

/// Window between a block timeout and the forced advance.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Lifecycle of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    NotStarted,
    BlockIntro,
    InProgress,
    BlockTimeout,
    GracePeriod,
    Completed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::NotStarted => "not started",
            DeliveryState::BlockIntro => "showing the block introduction",
            DeliveryState::InProgress => "in progress",
            DeliveryState::BlockTimeout => "the block has timed out",
            DeliveryState::GracePeriod => "in the grace period",
            DeliveryState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Timing configuration of a delivery.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Seconds per authored time-limit unit.
    pub time_limit_multiplier: u32,
    /// Grace window after a timeout.
    pub grace_period: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            time_limit_multiplier: DEFAULT_TIME_LIMIT_MULTIPLIER,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl DeliveryConfig {
    /// Countdown length of `block`, or `None` if the block is untimed.
    pub fn countdown_secs(&self, block: &Block) -> Option<u32> {
        block
            .has_time_limit
            .then(|| block.time_limit.saturating_mul(self.time_limit_multiplier))
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: DeliveryState,
    pub to: DeliveryState,
    pub block_index: usize,
}

/// Answered and total question counts of the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockProgress {
    pub answered: usize,
    pub total: usize,
}

/// Identifies one visit of one block.
///
/// Asynchronous work started for a block holds a ticket and applies its
/// result only while [`DeliveryMachine::is_current`] accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTicket {
    block_index: usize,
    visit: u64,
}

impl BlockTicket {
    pub fn block_index(&self) -> usize {
        self.block_index
    }
}

/// State machine for a single respondent session.
pub struct DeliveryMachine<T: BlockTimer> {
    model: Arc<ContentModel>,
    config: DeliveryConfig,
    timer: T,
    presentation: Presentation,
    collector: AnswerCollector,
    state: DeliveryState,
    block_index: usize,
    question_index: usize,
    /// Bumped whenever the timer is armed or cancelled.
    epoch: u64,
    /// Bumped whenever a block is entered.
    visit: u64,
    time_left: Option<u32>,
    history: Vec<Transition>,
}

impl<T: BlockTimer> DeliveryMachine<T> {
    pub fn new(model: Arc<ContentModel>, timer: T, config: DeliveryConfig) -> Self {
        Self::with_presentation(model, timer, config, Presentation::new())
    }

    pub fn with_presentation(
        model: Arc<ContentModel>,
        timer: T,
        config: DeliveryConfig,
        presentation: Presentation,
    ) -> Self {
        Self {
            model,
            config,
            timer,
            presentation,
            collector: AnswerCollector::new(),
            state: DeliveryState::NotStarted,
            block_index: 0,
            question_index: 0,
            epoch: 0,
            visit: 0,
            time_left: None,
            history: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn model(&self) -> &Arc<ContentModel> {
        &self.model
    }

    pub fn collector(&self) -> &AnswerCollector {
        &self.collector
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    /// Seconds left in the current block, if it is timed and running.
    pub fn time_left(&self) -> Option<u32> {
        self.time_left
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// The block being introduced, answered or timed out.
    pub fn current_block(&self) -> Option<&Block> {
        match self.state {
            DeliveryState::NotStarted | DeliveryState::Completed => None,
            _ => self.model.block_at(self.block_index),
        }
    }

    pub fn current_layout(&self) -> Option<&BlockLayout> {
        let block = self.current_block()?;
        self.presentation.cached(block.id)
    }

    /// The question on screen while the block is in progress.
    pub fn current_question(&self) -> Option<&PresentedQuestion> {
        if self.state != DeliveryState::InProgress {
            return None;
        }
        self.current_layout()?.get(self.question_index)
    }

    pub fn block_progress(&self) -> Option<BlockProgress> {
        let layout = self.current_layout()?;
        Some(BlockProgress {
            answered: self.collector.answered_count(layout.question_ids()),
            total: layout.len(),
        })
    }

    pub fn ticket(&self) -> BlockTicket {
        BlockTicket {
            block_index: self.block_index,
            visit: self.visit,
        }
    }

    /// Whether work started under `ticket` may still be applied.
    pub fn is_current(&self, ticket: BlockTicket) -> bool {
        ticket.visit == self.visit
            && ticket.block_index == self.block_index
            && matches!(
                self.state,
                DeliveryState::BlockIntro | DeliveryState::InProgress
            )
    }

    /// Answers over every question of the test, gap-filled. Only available
    /// once the test is completed.
    pub fn widened_answers(&self) -> Result<WidenedAnswers, DeliveryError> {
        if self.state != DeliveryState::Completed {
            return Err(DeliveryError::InvalidState {
                action: "collect results",
                state: self.state,
            });
        }
        Ok(self.collector.widen(&self.model))
    }

    // -----------------------------------------------------------------------
    // Respondent events
    // -----------------------------------------------------------------------

    /// Leave `NotStarted` for the first block's introduction.
    pub fn start_test(&mut self) -> Result<(), DeliveryError> {
        self.require(DeliveryState::NotStarted, "start the test")?;
        tracing::info!(
            test = %self.model.test().title,
            blocks = self.model.blocks().len(),
            "starting test"
        );
        self.enter_block(0);
        Ok(())
    }

    /// Begin answering the introduced block, arming its countdown if timed.
    pub fn start_block(&mut self) -> Result<(), DeliveryError> {
        self.require(DeliveryState::BlockIntro, "start the block")?;
        self.question_index = 0;
        self.transition(DeliveryState::InProgress);

        let countdown = self
            .model
            .block_at(self.block_index)
            .and_then(|b| self.config.countdown_secs(b));
        if let Some(seconds) = countdown {
            let epoch = self.bump_epoch();
            self.time_left = Some(seconds);
            self.timer.arm(epoch, seconds);
        }
        Ok(())
    }

    /// Move to the next question, or past the block on its last question.
    pub fn next(&mut self) -> Result<(), DeliveryError> {
        self.require(DeliveryState::InProgress, "go to the next question")?;
        let Some(question_id) = self.current_question().map(|q| q.question_id) else {
            // Nothing to answer in this block.
            self.finish_block();
            return Ok(());
        };
        if !self.collector.is_answered(question_id) {
            return Err(DeliveryError::NoAnswerSelected(question_id));
        }

        let len = self.current_layout().map_or(0, BlockLayout::len);
        if self.question_index + 1 < len {
            self.question_index += 1;
        } else {
            self.finish_block();
        }
        Ok(())
    }

    /// Move back one question within the current block.
    pub fn prev(&mut self) -> Result<(), DeliveryError> {
        self.require(DeliveryState::InProgress, "go to the previous question")?;
        if self.question_index == 0 {
            return Err(DeliveryError::AtFirstQuestion);
        }
        self.question_index -= 1;
        Ok(())
    }

    /// Close the current block because its countdown ran out.
    ///
    /// Answers freeze, the countdown is cleared and the grace window starts.
    pub fn timeout(&mut self) -> Result<(), DeliveryError> {
        self.require(DeliveryState::InProgress, "time out the block")?;
        tracing::info!(block_index = self.block_index, "block timed out");
        self.timer.cancel();
        self.time_left = Some(0);
        self.transition(DeliveryState::BlockTimeout);

        let epoch = self.bump_epoch();
        self.timer.arm_grace(epoch, self.config.grace_period);
        self.transition(DeliveryState::GracePeriod);
        Ok(())
    }

    /// Replace the selection of a question of the current block.
    ///
    /// Duplicate ids are collapsed. Single-choice questions accept at most
    /// one answer.
    pub fn save_answers(
        &mut self,
        question_id: QuestionId,
        answer_ids: &[AnswerId],
    ) -> Result<(), DeliveryError> {
        self.check_mutable("change answers", question_id)?;
        let selection = self.model.check_selection(question_id, answer_ids)?;
        self.collector.save(question_id, selection);
        Ok(())
    }

    /// Apply a click on one answer and return the resulting selection.
    pub fn toggle_answer(
        &mut self,
        question_id: QuestionId,
        answer_id: AnswerId,
    ) -> Result<&[AnswerId], DeliveryError> {
        let mode = self.check_mutable("change answers", question_id)?;
        self.check_owned(question_id, answer_id)?;
        Ok(self
            .collector
            .toggle(&self.model, mode, question_id, answer_id))
    }

    /// Feed a countdown event. Returns `false` if the event was stale.
    pub fn on_timer(&mut self, event: TimerEvent) -> bool {
        if event.epoch != self.epoch {
            tracing::debug!(
                event_epoch = event.epoch,
                current_epoch = self.epoch,
                "dropping stale timer event"
            );
            return false;
        }

        match (event.kind, self.state) {
            (TimerEventKind::Tick { remaining }, DeliveryState::InProgress) => {
                self.time_left = Some(remaining);
                true
            }
            (TimerEventKind::Expired, DeliveryState::InProgress) => self.timeout().is_ok(),
            (TimerEventKind::GraceElapsed, DeliveryState::GracePeriod) => {
                self.finish_block();
                true
            }
            (kind, state) => {
                tracing::debug!(?kind, %state, "ignoring timer event");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require(&self, expected: DeliveryState, action: &'static str) -> Result<(), DeliveryError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DeliveryError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn check_mutable(
        &self,
        action: &'static str,
        question_id: QuestionId,
    ) -> Result<QuestionsType, DeliveryError> {
        self.require(DeliveryState::InProgress, action)?;
        let in_block = self
            .current_layout()
            .is_some_and(|layout| layout.contains(question_id));
        if !in_block {
            return Err(DeliveryError::QuestionNotInBlock(question_id));
        }
        Ok(self
            .current_block()
            .map(|b| b.questions_type)
            .unwrap_or_default())
    }

    fn check_owned(&self, question_id: QuestionId, answer_id: AnswerId) -> Result<(), DeliveryError> {
        if self.model.question_of_answer(answer_id) == Some(question_id) {
            Ok(())
        } else {
            Err(DeliveryError::ForeignAnswer {
                question_id,
                answer_id,
            })
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn transition(&mut self, to: DeliveryState) {
        let from = self.state;
        self.history.push(Transition {
            from,
            to,
            block_index: self.block_index,
        });
        tracing::debug!(%from, %to, block_index = self.block_index, "delivery transition");
        self.state = to;
    }

    fn enter_block(&mut self, index: usize) {
        self.block_index = index;
        self.question_index = 0;
        self.visit += 1;

        match self.model.block_at(index).map(|b| b.id) {
            Some(block_id) => {
                self.presentation.layout(&self.model, block_id);
                self.transition(DeliveryState::BlockIntro);
            }
            None => {
                tracing::info!("test completed");
                self.transition(DeliveryState::Completed);
            }
        }
    }

    fn finish_block(&mut self) {
        self.timer.cancel();
        self.bump_epoch();
        self.time_left = None;
        self.enter_block(self.block_index + 1);
    }
}

impl<T: BlockTimer> fmt::Debug for DeliveryMachine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryMachine")
            .field("state", &self.state)
            .field("block_index", &self.block_index)
            .field("question_index", &self.question_index)
            .field("epoch", &self.epoch)
            .field("time_left", &self.time_left)
            .finish_non_exhaustive()
    }
}
