//! Remote hash-matching service.
//!
//! The matcher is an opaque black box: it takes image bytes and answers
//! with a status code and, when the code is [`StatusCode::Ok`], a match
//! verdict. Only an `Ok` response is a usable verdict; every other outcome
//! makes the scanner fall back to the next candidate.
//!
//! # Retry Strategy
//!
//! [`PhotoDnaClient`] retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors other than timeouts → retry
//! - Timeouts and other 4xx → fail immediately
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MatcherConfig;
use crate::error::MatcherError;

/// Closed set of service status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    InvalidParams,
    UnknownScenario,
    NotVerifiableAsImage,
    PixelSizeOutOfRange,
    RequestTooLarge,
    InvalidJsonOrUnknown,
}

impl StatusCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            3000 => StatusCode::Ok,
            3002 => StatusCode::InvalidParams,
            3004 => StatusCode::UnknownScenario,
            3206 => StatusCode::NotVerifiableAsImage,
            3208 => StatusCode::PixelSizeOutOfRange,
            3209 => StatusCode::RequestTooLarge,
            _ => StatusCode::InvalidJsonOrUnknown,
        }
    }
}

/// A parsed service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResponse {
    pub status: StatusCode,
    pub raw_code: i64,
    pub is_match: bool,
    pub raw_body: String,
}

impl MatchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// The remote matcher as seen by the scanner.
#[async_trait]
pub trait RemoteMatcher: Send + Sync {
    /// Check `bytes` against the service. A response with a non-Ok status
    /// is returned as `Ok(MatchResponse)`; transport failures as `Err`.
    async fn check(&self, bytes: &[u8], mime_type: &str) -> Result<MatchResponse, MatcherError>;
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "Code")]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(rename = "Status")]
    status: Option<RawStatus>,
    #[serde(rename = "IsMatch", default)]
    is_match: bool,
}

/// Parse a response body. Malformed JSON and missing status blocks map to
/// [`StatusCode::InvalidJsonOrUnknown`] rather than an error, so the raw
/// body is kept for the operator.
pub fn parse_response(body: &str) -> MatchResponse {
    match serde_json::from_str::<RawResponse>(body) {
        Ok(RawResponse {
            status: Some(status),
            is_match,
        }) => MatchResponse {
            status: StatusCode::from_code(status.code),
            raw_code: status.code,
            is_match,
            raw_body: body.to_string(),
        },
        _ => MatchResponse {
            status: StatusCode::InvalidJsonOrUnknown,
            raw_code: -1,
            is_match: false,
            raw_body: body.to_string(),
        },
    }
}

/// PhotoDNA-style HTTP client.
///
/// Posts the raw image bytes to the configured endpoint with the
/// subscription key from `PHOTODNA_API_KEY`.
pub struct PhotoDnaClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl PhotoDnaClient {
    /// # Errors
    ///
    /// Returns [`MatcherError::NotConfigured`] if the endpoint is empty or
    /// `PHOTODNA_API_KEY` is not in the environment.
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        let api_key = std::env::var("PHOTODNA_API_KEY").map_err(|_| {
            MatcherError::NotConfigured("PHOTODNA_API_KEY environment variable not set".to_string())
        })?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &MatcherConfig, api_key: String) -> Result<Self, MatcherError> {
        if config.endpoint.trim().is_empty() {
            return Err(MatcherError::NotConfigured(
                "matcher.endpoint is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl RemoteMatcher for PhotoDnaClient {
    async fn check(&self, bytes: &[u8], mime_type: &str) -> Result<MatchResponse, MatcherError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .header("Content-Type", mime_type)
                .body(bytes.to_vec())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        let parsed = parse_response(&body);
                        debug!(code = parsed.raw_code, is_match = parsed.is_match, "matcher response");
                        return Ok(parsed);
                    }

                    let err = MatcherError::HttpStatus {
                        status: status.as_u16(),
                        body,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, error = %err, "matcher request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) if e.is_timeout() => return Err(MatcherError::Timeout),
                Err(e) => {
                    warn!(attempt, error = %e, "matcher request failed, retrying");
                    last_err = Some(MatcherError::Http(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MatcherError::InvalidResponse("matcher request failed after retries".to_string())
        }))
    }
}
