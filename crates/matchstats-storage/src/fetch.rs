//! Single-attempt HTTP fetch of encrypted artifacts and outcome classification.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use matchstats_core::{DecryptedArtifact, NaturalKey};
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::cipher::{self, DecryptionStage, EncryptedEnvelope};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/47.0.2526.106 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Any non-2xx answer is treated as transient.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_success() {
        RetryDisposition::NonRetryable
    } else {
        RetryDisposition::Retryable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed envelope from {url}: {message}")]
    Envelope { url: String, message: String },
    #[error("decryption failed at {stage:?} stage for {url}: {message}")]
    Decryption {
        url: String,
        stage: DecryptionStage,
        message: String,
    },
    #[error("fetch of {url} aborted: {message}")]
    Aborted { url: String, message: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Transport { .. } | Self::HttpStatus { .. } => RetryDisposition::Retryable,
            Self::Envelope { .. } | Self::Decryption { .. } | Self::Aborted { .. } => {
                RetryDisposition::NonRetryable
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == RetryDisposition::Retryable
    }

    fn transport(url: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Exponential backoff between attempts of one work item.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the failed attempt with zero-based index `attempt_index`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), stretched by up to 100% when jitter is on.
    pub fn sleep_for_attempt(&self, attempt_index: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt_index);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

/// One network round-trip for one artifact identity.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, natural_key: &NaturalKey, url: &str) -> Result<DecryptedArtifact, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetchClient {
    client: reqwest::Client,
}

impl HttpFetchClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET returning the raw body of a 2xx response.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::transport(url, &err))?;

        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), disposition = ?classify_status(status), "non-success status");
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| FetchError::transport(url, &err))?;
        Ok(body.to_vec())
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let body = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Parses a response body as an envelope and decrypts it.
pub fn open_envelope(url: &str, body: &[u8]) -> Result<DecryptedArtifact, FetchError> {
    let envelope: EncryptedEnvelope =
        serde_json::from_slice(body).map_err(|err| FetchError::Envelope {
            url: url.to_string(),
            message: err.to_string(),
        })?;
    cipher::decrypt(&envelope).map_err(|err| FetchError::Decryption {
        url: url.to_string(),
        stage: err.stage(),
        message: err.to_string(),
    })
}

#[async_trait]
impl ArtifactFetcher for HttpFetchClient {
    async fn fetch(&self, natural_key: &NaturalKey, url: &str) -> Result<DecryptedArtifact, FetchError> {
        let span = info_span!("artifact_fetch", %natural_key, url);
        async {
            let body = self.get_bytes(url).await?;
            open_envelope(url, &body)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key() -> NaturalKey {
        NaturalKey::for_match(2024, "339", "ms001").unwrap()
    }

    fn client() -> HttpFetchClient {
        HttpFetchClient::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("matchstats-test".into()),
        })
        .expect("client")
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_double_the_delay() {
        let policy = BackoffPolicy {
            jitter: true,
            ..Default::default()
        };
        for _ in 0..20 {
            let slept = policy.sleep_for_attempt(0);
            assert!(slept >= Duration::from_secs(2) && slept <= Duration::from_secs(4));
        }
    }

    #[test]
    fn status_and_error_classification() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);

        let fatal = FetchError::Decryption {
            url: "u".into(),
            stage: DecryptionStage::Cipher,
            message: "bad".into(),
        };
        assert!(!fatal.is_retryable());
        assert!(FetchError::HttpStatus { status: 503, url: "u".into() }.is_retryable());
    }

    #[tokio::test]
    async fn fetch_decrypts_a_served_envelope() {
        let server = MockServer::start().await;
        let doc = json!({"setsCompleted": 3});
        let envelope = cipher::seal(&doc, 1_700_000_000_000).unwrap();
        Mock::given(method("GET"))
            .and(path("/stats/MS001"))
            .and(header("user-agent", "matchstats-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&envelope))
            .mount(&server)
            .await;

        let url = format!("{}/stats/MS001", server.uri());
        let artifact = client().fetch(&key(), &url).await.expect("fetch");
        assert_eq!(artifact.value(), &doc);
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client().fetch(&key(), &server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn non_envelope_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
            .mount(&server)
            .await;

        let err = client().fetch(&key(), &server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Envelope { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn corrupt_cipher_text_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "AAAA",
                "lastModified": 1_700_000_000_000i64
            })))
            .mount(&server)
            .await;

        let err = client().fetch(&key(), &server.uri()).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Decryption {
                stage: DecryptionStage::Cipher,
                ..
            }
        ));
    }
}
