//! Tokio-backed block countdown.
//!
//! Each armed countdown is one spawned task. Cancelling aborts the task, so
//! no tick from a finished block can reach the state machine; events that
//! were already queued are dropped by epoch.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::traits::BlockTimer;

/// Interval between countdown ticks.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// What a countdown reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEventKind {
    /// Whole seconds left in the block.
    Tick { remaining: u32 },
    /// The countdown reached zero.
    Expired,
    /// The grace window after a timeout has elapsed.
    GraceElapsed,
}

/// A countdown event tagged with the epoch it was armed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub epoch: u64,
    pub kind: TimerEventKind,
}

/// [`BlockTimer`] running on the current tokio runtime.
#[derive(Debug)]
pub struct TimerController {
    events: mpsc::UnboundedSender<TimerEvent>,
    tick: Duration,
    task: Option<JoinHandle<()>>,
}

impl TimerController {
    /// Create a controller and the receiving end of its event stream.
    pub fn new(tick: Duration) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            events,
            tick,
            task: None,
        };
        (controller, rx)
    }

    fn replace_task(&mut self, task: JoinHandle<()>) {
        self.cancel();
        self.task = Some(task);
    }
}

impl BlockTimer for TimerController {
    fn arm(&mut self, epoch: u64, seconds: u32) {
        tracing::debug!(epoch, seconds, "arming block countdown");
        let events = self.events.clone();
        let tick = self.tick;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            let mut remaining = seconds;
            let send = |kind| events.send(TimerEvent { epoch, kind }).is_ok();
            if !send(TimerEventKind::Tick { remaining }) {
                return;
            }
            while remaining > 0 {
                interval.tick().await;
                remaining -= 1;
                if !send(TimerEventKind::Tick { remaining }) {
                    return;
                }
            }
            send(TimerEventKind::Expired);
        });
        self.replace_task(task);
    }

    fn arm_grace(&mut self, epoch: u64, grace: Duration) {
        tracing::debug!(epoch, grace_ms = grace.as_millis() as u64, "arming grace window");
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events.send(TimerEvent {
                epoch,
                kind: TimerEventKind::GraceElapsed,
            });
        });
        self.replace_task(task);
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                tracing::debug!("cancelling pending countdown");
            }
            task.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimerController {
    fn drop(&mut self) {
        self.cancel();
    }
}
