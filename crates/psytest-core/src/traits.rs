//! Core trait definitions for the block countdown and the content source.
//!
//! The tokio countdown lives in [`crate::timer`]; HTTP and in-memory content
//! sources are implemented by the `psytest-client` crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    SessionInfo, SubmissionPayload, SubmissionReceipt, TestBundle, TestId, TokenStatus,
};

// ---------------------------------------------------------------------------
// Block timer trait
// ---------------------------------------------------------------------------

/// Owner of the single countdown of the block in progress.
///
/// Every event the timer emits carries the `epoch` it was armed with. Arming
/// again replaces the previous countdown.
pub trait BlockTimer: Send {
    /// Start counting down `seconds` whole seconds.
    fn arm(&mut self, epoch: u64, seconds: u32);

    /// Start the post-timeout grace window.
    fn arm_grace(&mut self, epoch: u64, grace: Duration);

    /// Cancel the pending countdown or grace window. A no-op when idle.
    fn cancel(&mut self);

    /// Whether a countdown or grace window is pending.
    fn is_armed(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Content source trait
// ---------------------------------------------------------------------------

/// The collaborator that serves test content and accepts results.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Human-readable source name (e.g. "http").
    fn name(&self) -> &str;

    /// Whether the session's token has already been used.
    async fn token_status(&self, session: &SessionInfo) -> anyhow::Result<TokenStatus>;

    /// Load the read-only content bundle of a test.
    async fn load_bundle(&self, test_id: TestId) -> anyhow::Result<TestBundle>;

    /// Save the gap-filled answers of a completed session.
    async fn submit_results(
        &self,
        payload: &SubmissionPayload,
    ) -> anyhow::Result<SubmissionReceipt>;

    /// Fetch a question image.
    async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    /// Whether a failed call may succeed if repeated.
    fn is_transient(&self, _error: &anyhow::Error) -> bool {
        true
    }
}
