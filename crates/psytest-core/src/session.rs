//! Respondent session driver.
//!
//! Wires a [`DeliveryMachine`] to a tokio countdown and a [`ContentSource`]:
//! refuses used tokens, loads content with bounded retries, pumps timer
//! events into the machine, discards asynchronous results for blocks the
//! respondent has already left, and submits the gap-filled answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::collector::GapWarning;
use crate::content::ContentModel;
use crate::delivery::{BlockTicket, DeliveryConfig, DeliveryMachine, DeliveryState};
use crate::error::SessionError;
use crate::model::{QuestionId, SessionInfo, SubmissionPayload, SubmissionReceipt, TestBundle};
use crate::scoring::ScoreSheet;
use crate::timer::{TimerController, TimerEvent, DEFAULT_TICK};
use crate::traits::ContentSource;

/// Session-level configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub delivery: DeliveryConfig,
    /// Countdown tick interval.
    pub tick: Duration,
    /// Extra attempts when loading content fails transiently.
    pub load_retries: u32,
    /// Delay between load attempts.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryConfig::default(),
            tick: DEFAULT_TICK,
            load_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Images fetched for the questions of one block visit.
#[derive(Debug)]
pub struct FetchedImages {
    pub ticket: BlockTicket,
    pub images: Vec<(QuestionId, Vec<u8>)>,
}

/// One respondent's run through a test.
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    info: SessionInfo,
    source: Arc<dyn ContentSource>,
    machine: DeliveryMachine<TimerController>,
    timer_events: mpsc::UnboundedReceiver<TimerEvent>,
    images: HashMap<QuestionId, Vec<u8>>,
    pending_payload: Option<SubmissionPayload>,
    gaps: Vec<GapWarning>,
    receipt: Option<SubmissionReceipt>,
}

impl Session {
    /// Open a session: check the token, then load and index the content.
    ///
    /// Must be called within a tokio runtime.
    #[tracing::instrument(skip_all, fields(test_id = info.test_id, user_id = info.user_id))]
    pub async fn open(
        source: Arc<dyn ContentSource>,
        info: SessionInfo,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let status = source
            .token_status(&info)
            .await
            .map_err(SessionError::Source)?;
        if status.used {
            tracing::warn!("token already used, refusing to start");
            return Err(SessionError::TokenAlreadyUsed);
        }

        let bundle = load_with_retries(source.as_ref(), &info, &config).await?;
        let model = Arc::new(ContentModel::from_bundle(bundle)?);
        let (timer, timer_events) = TimerController::new(config.tick);
        let machine = DeliveryMachine::new(model, timer, config.delivery);

        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, source = source.name(), "session opened");
        Ok(Self {
            id,
            started_at: Utc::now(),
            info,
            source,
            machine,
            timer_events,
            images: HashMap::new(),
            pending_payload: None,
            gaps: Vec::new(),
            receipt: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn source(&self) -> Arc<dyn ContentSource> {
        Arc::clone(&self.source)
    }

    pub fn machine(&self) -> &DeliveryMachine<TimerController> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut DeliveryMachine<TimerController> {
        &mut self.machine
    }

    pub fn state(&self) -> DeliveryState {
        self.machine.state()
    }

    // -----------------------------------------------------------------------
    // Timer events
    // -----------------------------------------------------------------------

    /// Apply every timer event already queued. Returns how many were applied.
    pub fn pump_timer(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.timer_events.try_recv() {
            if self.machine.on_timer(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next timer event and apply it. Returns `false` if the
    /// event was stale.
    ///
    /// Only await this while the countdown or grace window is armed.
    pub async fn wait_timer(&mut self) -> bool {
        match self.timer_events.recv().await {
            Some(event) => self.machine.on_timer(event),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Question images
    // -----------------------------------------------------------------------

    /// Image URLs of the current block's questions, with a ticket for the
    /// current block visit.
    pub fn image_requests(&self) -> (BlockTicket, Vec<(QuestionId, String)>) {
        let ticket = self.machine.ticket();
        let model = self.machine.model();
        let requests = self
            .machine
            .current_layout()
            .map(|layout| {
                layout
                    .question_ids()
                    .filter(|q| !self.images.contains_key(q))
                    .filter_map(|q| {
                        let url = model.question(q)?.image_url.clone()?;
                        Some((q, url))
                    })
                    .collect()
            })
            .unwrap_or_default();
        (ticket, requests)
    }

    /// Store fetched images if their block visit is still current.
    pub fn apply_images(&mut self, fetched: FetchedImages) -> bool {
        if !self.machine.is_current(fetched.ticket) {
            tracing::debug!(
                block_index = fetched.ticket.block_index(),
                count = fetched.images.len(),
                "discarding images for a block that is no longer current"
            );
            return false;
        }
        self.images.extend(fetched.images);
        true
    }

    /// Fetch and apply the current block's images.
    pub async fn prefetch_images(&mut self) -> bool {
        let (ticket, requests) = self.image_requests();
        if requests.is_empty() {
            return true;
        }
        let images = fetch_images(self.source.as_ref(), requests).await;
        self.apply_images(FetchedImages { ticket, images })
    }

    pub fn image(&self, question_id: QuestionId) -> Option<&[u8]> {
        self.images.get(&question_id).map(Vec::as_slice)
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Unanswered questions left empty in the payload.
    pub fn gaps(&self) -> &[GapWarning] {
        &self.gaps
    }

    /// The payload built by the first `submit` call.
    pub fn pending_payload(&self) -> Option<&SubmissionPayload> {
        self.pending_payload.as_ref()
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        self.receipt.as_ref()
    }

    /// Submit the results of a completed test.
    ///
    /// The payload is built once; after a failure, calling `submit` again
    /// resends the identical payload.
    #[tracing::instrument(skip(self), fields(session_id = %self.id))]
    pub async fn submit(&mut self) -> Result<&SubmissionReceipt, SessionError> {
        if self.receipt.is_some() {
            return Err(SessionError::AlreadySubmitted);
        }
        let state = self.machine.state();
        if state != DeliveryState::Completed {
            return Err(SessionError::NotCompleted(state));
        }

        if self.pending_payload.is_none() {
            let widened = self
                .machine
                .widened_answers()
                .map_err(|_| SessionError::NotCompleted(state))?;
            self.gaps = widened.gaps;
            self.pending_payload = Some(SubmissionPayload {
                user_id: self.info.user_id,
                test_id: self.info.test_id,
                token: self.info.token.clone(),
                answers: widened.answers,
            });
        }
        let Some(payload) = self.pending_payload.as_ref() else {
            return Err(SessionError::NotCompleted(state));
        };

        match self.source.submit_results(payload).await {
            Ok(receipt) => {
                tracing::info!(
                    questions = payload.answers.len(),
                    gaps = self.gaps.len(),
                    "results submitted"
                );
                Ok(self.receipt.insert(receipt))
            }
            Err(e) => {
                tracing::error!("failed to submit results: {:#}", e);
                Err(SessionError::SubmissionFailed(e))
            }
        }
    }

    /// Score the gap-filled answers locally.
    pub fn local_scores(&self) -> Result<ScoreSheet, SessionError> {
        let widened = self
            .machine
            .widened_answers()
            .map_err(|_| SessionError::NotCompleted(self.machine.state()))?;
        Ok(ScoreSheet::compute(self.machine.model(), &widened.answers))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("info", &self.info)
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

/// Fetch images concurrently. Failed fetches are logged and skipped.
pub async fn fetch_images(
    source: &dyn ContentSource,
    requests: Vec<(QuestionId, String)>,
) -> Vec<(QuestionId, Vec<u8>)> {
    let fetches = requests.into_iter().map(|(question_id, url)| async move {
        match source.fetch_image(&url).await {
            Ok(bytes) => Some((question_id, bytes)),
            Err(e) => {
                tracing::warn!(question_id, url = %url, "image fetch failed: {:#}", e);
                None
            }
        }
    });
    join_all(fetches).await.into_iter().flatten().collect()
}

async fn load_with_retries(
    source: &dyn ContentSource,
    info: &SessionInfo,
    config: &SessionConfig,
) -> Result<TestBundle, SessionError> {
    let mut attempt = 0;
    loop {
        match source.load_bundle(info.test_id).await {
            Ok(bundle) => return Ok(bundle),
            Err(e) if attempt < config.load_retries && source.is_transient(&e) => {
                attempt += 1;
                tracing::warn!(attempt, "loading test content failed, retrying: {:#}", e);
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => return Err(SessionError::Source(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::fixtures::*;
    use crate::model::{TestId, TokenStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubSource {
        used: bool,
        load_failures: Mutex<u32>,
        submit_failures: Mutex<u32>,
        loads: Mutex<u32>,
        submitted: Mutex<Vec<SubmissionPayload>>,
        bundle: Option<TestBundle>,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                bundle: Some(timed_bundle()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ContentSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn token_status(&self, _session: &SessionInfo) -> anyhow::Result<TokenStatus> {
            Ok(TokenStatus { used: self.used })
        }

        async fn load_bundle(&self, _test_id: TestId) -> anyhow::Result<TestBundle> {
            *self.loads.lock().unwrap() += 1;
            let mut failures = self.load_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("503 service unavailable");
            }
            self.bundle.clone().ok_or_else(|| anyhow::anyhow!("no bundle"))
        }

        async fn submit_results(
            &self,
            payload: &SubmissionPayload,
        ) -> anyhow::Result<SubmissionReceipt> {
            self.submitted.lock().unwrap().push(payload.clone());
            let mut failures = self.submit_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("502 bad gateway");
            }
            Ok(SubmissionReceipt::default())
        }

        async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            Ok(url.as_bytes().to_vec())
        }
    }

    /// The two-block fixture with block 1 timed and an image on question 200.
    fn timed_bundle() -> TestBundle {
        let mut bundle = two_block_bundle();
        for b in &mut bundle.blocks {
            if b.id == 1 {
                b.has_time_limit = true;
                b.time_limit = 1;
            }
        }
        for q in &mut bundle.questions {
            if q.id == 200 {
                q.image_url = Some("img/200.png".into());
            }
        }
        bundle
    }

    fn info() -> SessionInfo {
        SessionInfo {
            test_id: 7,
            user_id: 3,
            email: "r@example.com".into(),
            token: "tok".into(),
        }
    }

    async fn open(source: StubSource) -> (Arc<StubSource>, Result<Session, SessionError>) {
        let source = Arc::new(source);
        let session = Session::open(source.clone(), info(), SessionConfig::default()).await;
        (source, session)
    }

    /// Answer every question of block 2 and finish the test.
    fn finish_second_block(session: &mut Session) {
        let m = session.machine_mut();
        m.start_block().unwrap();
        m.save_answers(200, &[2002]).unwrap();
        m.next().unwrap();
        m.save_answers(201, &[2011]).unwrap();
        m.next().unwrap();
    }

    #[tokio::test]
    async fn used_token_is_refused_before_loading() {
        let (source, session) = open(StubSource {
            used: true,
            ..StubSource::new()
        })
        .await;
        let err = session.unwrap_err();
        assert!(matches!(err, SessionError::TokenAlreadyUsed));
        assert!(err.is_terminal());
        assert_eq!(*source.loads.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_load_failures_are_retried() {
        let (source, session) = open(StubSource {
            load_failures: Mutex::new(2),
            ..StubSource::new()
        })
        .await;
        assert!(session.is_ok());
        assert_eq!(*source.loads.lock().unwrap(), 3);

        let (_, session) = open(StubSource {
            load_failures: Mutex::new(3),
            ..StubSource::new()
        })
        .await;
        assert!(matches!(session, Err(SessionError::Source(_))));
    }

    #[tokio::test]
    async fn broken_content_is_terminal() {
        let mut bundle = two_block_bundle();
        bundle.questions.push(question(300, 9));
        let (_, session) = open(StubSource {
            bundle: Some(bundle),
            ..StubSource::new()
        })
        .await;
        let err = session.unwrap_err();
        assert!(matches!(err, SessionError::Content(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_block_expires_and_grace_advances() {
        let (_, session) = open(StubSource::new()).await;
        let mut session = session.unwrap();
        let start = tokio::time::Instant::now();

        session.machine_mut().start_test().unwrap();
        session.machine_mut().start_block().unwrap();
        while session.state() == DeliveryState::InProgress {
            session.wait_timer().await;
        }
        assert_eq!(session.state(), DeliveryState::GracePeriod);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        while session.state() == DeliveryState::GracePeriod {
            session.wait_timer().await;
        }
        assert_eq!(session.state(), DeliveryState::BlockIntro);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(session.machine().current_block().map(|b| b.id), Some(2));

        finish_second_block(&mut session);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.pump_timer(), 0);
        assert_eq!(session.state(), DeliveryState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_is_gap_filled_and_single_use() {
        let (source, session) = open(StubSource::new()).await;
        let mut session = session.unwrap();
        assert!(matches!(
            session.submit().await,
            Err(SessionError::NotCompleted(DeliveryState::NotStarted))
        ));

        let m = session.machine_mut();
        m.start_test().unwrap();
        m.start_block().unwrap();
        m.timeout().unwrap();
        while session.state() == DeliveryState::GracePeriod {
            session.wait_timer().await;
        }
        finish_second_block(&mut session);

        session.submit().await.unwrap();
        let payload = session.pending_payload().unwrap().clone();
        assert_eq!(payload.user_id, 3);
        assert_eq!(payload.test_id, 7);
        assert_eq!(payload.token, "tok");
        assert_eq!(payload.answers.len(), 4);
        assert_eq!(payload.answers[&100], vec![1001]);
        assert_eq!(payload.answers[&101], vec![1012]);
        assert!(session.gaps().is_empty());

        assert!(matches!(
            session.submit().await,
            Err(SessionError::AlreadySubmitted)
        ));
        assert_eq!(source.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_resends_the_same_payload() {
        let (source, session) = open(StubSource {
            submit_failures: Mutex::new(1),
            ..StubSource::new()
        })
        .await;
        let mut session = session.unwrap();
        let m = session.machine_mut();
        m.start_test().unwrap();
        m.start_block().unwrap();
        m.save_answers(100, &[1000]).unwrap();
        m.next().unwrap();
        m.save_answers(101, &[1010]).unwrap();
        m.next().unwrap();
        finish_second_block(&mut session);

        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::SubmissionFailed(_)));
        assert!(!err.is_terminal());
        assert_eq!(session.state(), DeliveryState::Completed);

        session.submit().await.unwrap();
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0], submitted[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn images_for_a_left_block_are_discarded() {
        let (_, session) = open(StubSource::new()).await;
        let mut session = session.unwrap();
        let m = session.machine_mut();
        m.start_test().unwrap();
        m.start_block().unwrap();
        m.timeout().unwrap();
        while session.state() == DeliveryState::GracePeriod {
            session.wait_timer().await;
        }

        // Block 2 is introduced; its image request is issued.
        let (ticket, requests) = session.image_requests();
        assert_eq!(requests, vec![(200, "img/200.png".to_string())]);
        let images = fetch_images(session.source().as_ref(), requests).await;

        finish_second_block(&mut session);
        assert!(!session.apply_images(FetchedImages { ticket, images }));
        assert!(session.image(200).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_applies_current_images() {
        let (_, session) = open(StubSource::new()).await;
        let mut session = session.unwrap();
        let m = session.machine_mut();
        m.start_test().unwrap();
        m.start_block().unwrap();
        m.timeout().unwrap();
        while session.state() == DeliveryState::GracePeriod {
            session.wait_timer().await;
        }
        assert!(session.prefetch_images().await);
        assert_eq!(session.image(200), Some(&b"img/200.png"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn local_scores_after_completion() {
        let (_, session) = open(StubSource::new()).await;
        let mut session = session.unwrap();
        assert!(session.local_scores().is_err());

        let m = session.machine_mut();
        m.start_test().unwrap();
        m.start_block().unwrap();
        m.save_answers(100, &[1000]).unwrap();
        m.next().unwrap();
        m.save_answers(101, &[1011]).unwrap();
        m.next().unwrap();
        finish_second_block(&mut session);

        let scores = session.local_scores().unwrap();
        assert_eq!(scores.raw(10), Some(2.0));
        assert_eq!(scores.raw(11), Some(-1.0));
        assert_eq!(scores.raw(20), Some(5.0));
    }
}
