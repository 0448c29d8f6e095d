
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::Embedder;
use crate::config::RemoteConfig;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Remote embedding backend.
///
/// Delegates each text to a Gemini-style `models/{model}:embedContent`
/// endpoint over blocking HTTP. The credential is read from the environment
/// variable named in the config; constructing the embedder without it is a
/// configuration error, and a response without a vector is a retrieval error.
pub struct RemoteEmbedder {
    endpoint: Url,
    model: String,
    api_key: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

impl RemoteEmbedder {
    /// Create an embedder from config, reading the API key from the
    /// configured environment variable.
    #[inline]
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Config(format!(
                "{} not set; required for the remote embedding backend",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Create an embedder with an explicit credential.
    #[inline]
    pub fn with_api_key(config: &RemoteConfig, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Config(format!(
                "{} is empty; required for the remote embedding backend",
                config.api_key_env
            )));
        }

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| RagError::Config(format!("invalid embedding endpoint: {e}")))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model_id().to_string(),
            api_key,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn embed_url(&self) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let url = format!("{}/models/{}:embedContent", base, self.model);
        Url::parse(&url)
            .map_err(|e| RagError::Config(format!("failed to build embedding URL: {e}")))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(RagError::Retrieval(format!(
                                    "embedding endpoint returned HTTP {status}"
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(RagError::Retrieval(format!(
                            "embedding request failed: {error}"
                        )));
                    }

                    last_error = Some(RagError::Retrieval(format!(
                        "embedding request failed: {error}"
                    )));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for embedding request");

        Err(last_error.unwrap_or_else(|| {
            RagError::Retrieval("embedding request failed after retries".to_string())
        }))
    }
}

impl Embedder for RemoteEmbedder {
    #[inline]
    fn name(&self) -> &'static str {
        "remote"
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Requesting remote embedding for text (length: {})", text.len());

        let request = EmbedContentRequest {
            content: Content {
                parts: vec![Part { text }],
            },
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::Retrieval(format!("failed to serialize request: {e}")))?;

        let url = self.embed_url()?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("x-goog-api-key", &self.api_key)
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedContentResponse = serde_json::from_str(&response_text)
            .map_err(|e| RagError::Retrieval(format!("failed to parse embedding response: {e}")))?;

        let vector = response
            .embedding
            .map(|embedding| embedding.values)
            .filter(|values| !values.is_empty())
            .ok_or_else(|| {
                RagError::Retrieval("embedding response carried no vector".to_string())
            })?;

        debug!("Received embedding with {} dimensions", vector.len());
        Ok(vector)
    }
}
