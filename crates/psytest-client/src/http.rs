//! HTTP content source.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET  /{testId}` and `/{testId}/{blocks,scales,questions,answers,weights}`
//! - `GET  /invitations/{token}` for the token status
//! - `POST /{testId}/save` for results

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::instrument;

use psytest_core::model::{
    Answer, Block, Question, Scale, SessionInfo, SubmissionPayload, SubmissionReceipt, Test,
    TestBundle, TestId, TokenStatus, Weight,
};
use psytest_core::traits::ContentSource;

use crate::error::ClientError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/tests";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Content source backed by the test server's REST API.
pub struct HttpContentSource {
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpContentSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn segment_url(&self, segments: &[&str]) -> Result<String, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(self.timeout_secs)
            } else {
                ClientError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::AuthenticationFailed(body));
        }
        if status == 404 {
            return Err(ClientError::NotFound(url.to_string()));
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::ApiError { status, message });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.send(self.client.get(&url), &url).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                url,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, session), fields(test_id = session.test_id))]
    async fn token_status(&self, session: &SessionInfo) -> anyhow::Result<TokenStatus> {
        let url = self.segment_url(&["invitations", &session.token])?;
        let status: TokenStatus = self.get_json(&url).await?;
        Ok(status)
    }

    #[instrument(skip(self))]
    async fn load_bundle(&self, test_id: TestId) -> anyhow::Result<TestBundle> {
        let test_path = test_id.to_string();
        let blocks_path = format!("{test_id}/blocks");
        let scales_path = format!("{test_id}/scales");
        let questions_path = format!("{test_id}/questions");
        let answers_path = format!("{test_id}/answers");
        let weights_path = format!("{test_id}/weights");
        let (test, blocks, scales, questions, answers, weights) = futures::try_join!(
            self.get_json::<Test>(&test_path),
            self.get_json::<Vec<Block>>(&blocks_path),
            self.get_json::<Vec<Scale>>(&scales_path),
            self.get_json::<Vec<Question>>(&questions_path),
            self.get_json::<Vec<Answer>>(&answers_path),
            self.get_json::<Vec<Weight>>(&weights_path),
        )?;
        tracing::info!(
            blocks = blocks.len(),
            questions = questions.len(),
            weights = weights.len(),
            "loaded test content"
        );

        Ok(TestBundle {
            test,
            blocks,
            scales,
            questions,
            answers,
            weights,
            ..Default::default()
        })
    }

    #[instrument(skip(self, payload), fields(test_id = payload.test_id))]
    async fn submit_results(
        &self,
        payload: &SubmissionPayload,
    ) -> anyhow::Result<SubmissionReceipt> {
        let url = self.url(&format!("{}/save", payload.test_id));
        let response = self
            .send(self.client.post(&url).json(payload), &url)
            .await?;
        let body = response.text().await.map_err(|e| ClientError::InvalidResponse {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if body.trim().is_empty() {
            return Ok(SubmissionReceipt::default());
        }
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ClientError::InvalidResponse {
                url,
                message: e.to_string(),
            })?;
        let final_result = match value {
            serde_json::Value::Object(mut map) if map.contains_key("finalResult") => {
                map.remove("finalResult").unwrap_or_default()
            }
            other => other,
        };
        Ok(SubmissionReceipt { final_result })
    }

    #[instrument(skip(self))]
    async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let url = self.url(url);
        let response = self.send(self.client.get(&url), &url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
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
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_bundle(server: &MockServer) {
        mount_json(server, "/7", serde_json::json!({"id": 7, "title": "Temperament"})).await;
        mount_json(
            server,
            "/7/blocks",
            serde_json::json!([{"id": 1, "order": 1, "hasTimeLimit": true, "timeLimit": 3}]),
        )
        .await;
        mount_json(
            server,
            "/7/scales",
            serde_json::json!([{"id": 10, "scaleType": "unipolar", "pole1": "E", "blockId": 1}]),
        )
        .await;
        mount_json(
            server,
            "/7/questions",
            serde_json::json!([{"id": 100, "text": "q", "blockId": "1"}]),
        )
        .await;
        mount_json(
            server,
            "/7/answers",
            serde_json::json!([
                {"id": 1000, "text": "yes", "questionId": 100},
                {"id": 1001, "text": "no", "questionId": 100}
            ]),
        )
        .await;
        mount_json(
            server,
            "/7/weights",
            serde_json::json!([
                {"answerId": "1000", "scaleId": 10, "value": 1},
                {"answer_id": 1001, "scale_id": 10, "value": 0}
            ]),
        )
        .await;
    }

    fn info(token: &str) -> SessionInfo {
        SessionInfo {
            test_id: 7,
            user_id: 3,
            email: "r@example.com".into(),
            token: token.into(),
        }
    }

    #[tokio::test]
    async fn loads_bundle_from_resource_endpoints() {
        let server = MockServer::start().await;
        mount_bundle(&server).await;

        let source = HttpContentSource::new(&server.uri(), None, 5);
        let bundle = source.load_bundle(7).await.unwrap();
        assert_eq!(bundle.test.title, "Temperament");
        assert_eq!(bundle.blocks[0].time_limit, 3);
        assert_eq!(bundle.questions[0].block_id, 1);
        assert_eq!(bundle.weights.len(), 2);
        assert_eq!(bundle.weights[0].answer_id, 1000);
    }

    #[tokio::test]
    async fn token_status_is_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invitations/abc"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "used": true,
                "email": "r@example.com"
            })))
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), Some("secret".into()), 5);
        let status = source.token_status(&info("abc")).await.unwrap();
        assert!(status.used);
    }

    #[tokio::test]
    async fn token_is_encoded_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/invitations/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "used": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/api/", server.uri());
        let source = HttpContentSource::new(&base, None, 5);
        let status = source.token_status(&info("a/b?c#d")).await.unwrap();
        assert!(!status.used);
    }

    #[tokio::test]
    async fn missing_test_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), None, 5);
        let err = source.load_bundle(7).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::NotFound(_))
        ));
        assert!(!source.is_transient(&err));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), None, 5);
        let err = source.load_bundle(7).await.unwrap_err();
        assert!(source.is_transient(&err));
    }

    #[tokio::test]
    async fn submit_posts_payload() {
        let server = MockServer::start().await;
        let payload = SubmissionPayload {
            user_id: 3,
            test_id: 7,
            token: "abc".into(),
            answers: [(100, vec![1000]), (101, vec![])].into_iter().collect(),
        };
        Mock::given(method("POST"))
            .and(path("/7/save"))
            .and(body_json(serde_json::json!({
                "userId": 3,
                "testId": 7,
                "token": "abc",
                "answers": {"100": [1000], "101": []}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"finalResult": {"10": 4.0}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), None, 5);
        let receipt = source.submit_results(&payload).await.unwrap();
        assert_eq!(receipt.final_result["10"], 4.0);
    }

    #[tokio::test]
    async fn unauthorized_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), Some("wrong".into()), 5);
        let payload = SubmissionPayload {
            user_id: 1,
            test_id: 7,
            token: "t".into(),
            answers: Default::default(),
        };
        let err = source.submit_results(&payload).await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }

    #[tokio::test]
    async fn relative_image_urls_use_the_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/images/q1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let source = HttpContentSource::new(&server.uri(), None, 5);
        assert_eq!(source.fetch_image("/images/q1.png").await.unwrap(), vec![1, 2, 3]);
        let absolute = format!("{}/images/q1.png", server.uri());
        assert_eq!(source.fetch_image(&absolute).await.unwrap(), vec![1, 2, 3]);
    }
}
