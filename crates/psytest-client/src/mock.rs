//! In-memory content source for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use psytest_core::model::{
    SessionInfo, SubmissionPayload, SubmissionReceipt, TestBundle, TestId, TokenStatus,
};
use psytest_core::traits::ContentSource;

use crate::error::ClientError;

/// A content source serving fixed bundles, for driving sessions without a
/// server.
///
/// Tokens become used once a submission succeeds, like the real server.
pub struct MockContentSource {
    bundles: HashMap<TestId, TestBundle>,
    images: HashMap<String, Vec<u8>>,
    used_tokens: Mutex<HashSet<String>>,
    /// Number of upcoming submissions that fail with a server error.
    failing_submissions: AtomicU32,
    load_calls: AtomicU32,
    submissions: Mutex<Vec<SubmissionPayload>>,
}

impl MockContentSource {
    /// Create a mock serving `bundle` under `test_id`.
    pub fn new(test_id: TestId, bundle: TestBundle) -> Self {
        Self {
            bundles: HashMap::from([(test_id, bundle)]),
            images: HashMap::new(),
            used_tokens: Mutex::new(HashSet::new()),
            failing_submissions: AtomicU32::new(0),
            load_calls: AtomicU32::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), bytes);
        self
    }

    pub fn with_used_token(self, token: &str) -> Self {
        self.used_tokens.lock().unwrap().insert(token.to_string());
        self
    }

    /// Make the next `count` submissions fail with HTTP 502.
    pub fn fail_next_submissions(&self, count: u32) {
        self.failing_submissions.store(count, Ordering::Relaxed);
    }

    pub fn load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::Relaxed)
    }

    /// Every payload received, including failed attempts.
    pub fn submissions(&self) -> Vec<SubmissionPayload> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn token_status(&self, session: &SessionInfo) -> anyhow::Result<TokenStatus> {
        let used = self.used_tokens.lock().unwrap().contains(&session.token);
        Ok(TokenStatus { used })
    }

    async fn load_bundle(&self, test_id: TestId) -> anyhow::Result<TestBundle> {
        self.load_calls.fetch_add(1, Ordering::Relaxed);
        self.bundles
            .get(&test_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("test {test_id}")).into())
    }

    async fn submit_results(
        &self,
        payload: &SubmissionPayload,
    ) -> anyhow::Result<SubmissionReceipt> {
        self.submissions.lock().unwrap().push(payload.clone());

        let failed = self
            .failing_submissions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ClientError::ApiError {
                status: 502,
                message: "bad gateway".into(),
            }
            .into());
        }

        let mut used = self.used_tokens.lock().unwrap();
        if !used.insert(payload.token.clone()) {
            return Err(ClientError::ApiError {
                status: 409,
                message: "token already used".into(),
            }
            .into());
        }
        Ok(SubmissionReceipt {
            final_result: serde_json::json!({ "answered": payload.answers.len() }),
        })
    }

    async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(url.to_string()).into())
    }

    fn is_transient(&self, error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<ClientError>()
            .map_or(true, |e| !e.is_permanent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psytest_core::delivery::DeliveryState;
    use psytest_core::error::SessionError;
    use psytest_core::model::{Answer, Block, Question, Scale, ScaleType, Test, Weight};
    use psytest_core::session::{Session, SessionConfig};
    use std::sync::Arc;

    fn bundle() -> TestBundle {
        let block: Block = serde_json::from_value(serde_json::json!({"id": 1, "order": 1}))
            .unwrap();
        TestBundle {
            test: Test {
                title: "Mini".into(),
                ..Default::default()
            },
            blocks: vec![block],
            scales: vec![Scale {
                id: 10,
                scale_type: Some(ScaleType::Unipolar),
                pole1: "E".into(),
                pole2: None,
                block_id: 1,
            }],
            questions: vec![Question {
                id: 100,
                text: "q".into(),
                image_url: Some("q100.png".into()),
                is_active: true,
                block_id: 1,
            }],
            answers: vec![
                Answer {
                    id: 1000,
                    text: "yes".into(),
                    question_id: 100,
                },
                Answer {
                    id: 1001,
                    text: "no".into(),
                    question_id: 100,
                },
            ],
            weights: vec![
                Weight {
                    answer_id: 1000,
                    scale_id: 10,
                    value: 1.0,
                },
                Weight {
                    answer_id: 1001,
                    scale_id: 10,
                    value: 0.0,
                },
            ],
            ..Default::default()
        }
    }

    fn info() -> SessionInfo {
        SessionInfo {
            test_id: 1,
            user_id: 2,
            email: "r@example.com".into(),
            token: "tok".into(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn injected_failures_are_counted_once() {
        let source = Arc::new(MockContentSource::new(1, bundle()));
        source.fail_next_submissions(3);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let source = source.clone();
                tokio::spawn(async move {
                    let payload = SubmissionPayload {
                        user_id: 2,
                        test_id: 1,
                        token: format!("tok-{i}"),
                        answers: Default::default(),
                    };
                    source.submit_results(&payload).await.is_err()
                })
            })
            .collect();

        let mut failed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                failed += 1;
            }
        }
        assert_eq!(failed, 3);
        assert_eq!(source.submissions().len(), 16);
    }

    #[tokio::test]
    async fn missing_test_is_not_retried() {
        let source = Arc::new(MockContentSource::new(1, bundle()));
        let mut session_info = info();
        session_info.test_id = 99;
        let result = Session::open(source.clone(), session_info, SessionConfig::default()).await;
        assert!(matches!(result, Err(SessionError::Source(_))));
        assert_eq!(source.load_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_single_use() {
        let source = Arc::new(
            MockContentSource::new(1, bundle()).with_image("q100.png", vec![0xff, 0xd8]),
        );

        let mut session = Session::open(source.clone(), info(), SessionConfig::default())
            .await
            .unwrap();
        let m = session.machine_mut();
        m.start_test().unwrap();
        assert!(session.prefetch_images().await);
        assert_eq!(session.image(100), Some(&[0xff, 0xd8][..]));

        let m = session.machine_mut();
        m.start_block().unwrap();
        m.toggle_answer(100, 1000).unwrap();
        m.next().unwrap();
        assert_eq!(session.state(), DeliveryState::Completed);

        source.fail_next_submissions(1);
        assert!(session.submit().await.is_err());
        let receipt = session.submit().await.unwrap();
        assert_eq!(receipt.final_result["answered"], 1);
        assert_eq!(source.submissions().len(), 2);

        let second = Session::open(source.clone(), info(), SessionConfig::default()).await;
        assert!(matches!(second, Err(SessionError::TokenAlreadyUsed)));
    }
}
