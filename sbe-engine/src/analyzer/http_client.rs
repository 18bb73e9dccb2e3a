//! HTTP Analyze client
//!
//! POSTs a batch of sample descriptors as JSON to the configured endpoint and
//! maps the reply onto `AnalyzeResponse`.
//!
//! # Wire format
//! Request: `{"samples": [{"id": .., "path": .., "size_bytes": .., ...}]}`
//!
//! Reply (per sample):
//! `{"results": [{"id": .., "result": {..}}, {"id": .., "error": {"kind": .., "message": ..}}]}`
//!
//! Reply (whole batch): `{"error": {"kind": .., "message": ..}}`
//!
//! # Status mapping
//! - 401/403 → Unauthorized (fatal)
//! - 404/410 → ServiceUnavailable (fatal)
//! - 400 → InvalidConfiguration (fatal)
//! - 408 → Timeout, 429 → RateLimited (honours `Retry-After` seconds)
//! - other 5xx → Network

use super::{AnalyzeFailure, AnalyzeResponse, Analyzer, SampleDescriptor, SampleResult};
use crate::error::EngineError;
use crate::models::{FailureKind, SampleId};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sbe_common::config::TomlConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("sbe-engine/", env!("CARGO_PKG_VERSION"));

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct WireRequest<'a> {
    samples: &'a [SampleDescriptor],
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Option<Vec<WireSampleResult>>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireSampleResult {
    id: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    kind: String,
    #[serde(default)]
    message: String,
}

impl WireError {
    fn into_failure(self) -> AnalyzeFailure {
        AnalyzeFailure::new(FailureKind::from_provider_code(&self.kind), self.message)
    }
}

/// Analyze client for an HTTP/JSON analysis service
pub struct HttpAnalyzer {
    /// HTTP client for API requests
    http_client: Client,
    endpoint: String,
    /// Bearer token, if the service requires one
    api_key: Option<String>,
}

impl HttpAnalyzer {
    /// Create new client
    ///
    /// `timeout` bounds the whole request; the orchestrator applies its own
    /// per-call timeout on top.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Create client from configuration
    ///
    /// Requires `analyzer.endpoint`; the API key resolves ENV → TOML.
    pub fn from_config(config: &TomlConfig) -> Result<Self, EngineError> {
        let endpoint = config
            .analyzer
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                EngineError::Config(
                    "Analyzer endpoint not configured. Set [analyzer] endpoint in the config file."
                        .to_string(),
                )
            })?;
        let api_key = sbe_common::config::resolve_api_key(config);
        if api_key.is_none() {
            warn!("No analyzer API key configured, sending unauthenticated requests");
        }

        Self::new(endpoint, api_key, config.engine.call_timeout())
    }

    async fn post_batch(&self, samples: &[SampleDescriptor]) -> AnalyzeResponse {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&WireRequest { samples });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() {
                    FailureKind::Timeout
                } else {
                    FailureKind::Network
                };
                return AnalyzeResponse::Batch(AnalyzeFailure::new(
                    kind,
                    format!("Analyze request failed: {}", e),
                ));
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return AnalyzeResponse::Batch(AnalyzeFailure::new(
                    FailureKind::Network,
                    format!("Failed to read Analyze response: {}", e),
                ))
            }
        };

        if !status.is_success() {
            return AnalyzeResponse::Batch(failure_for_status(status, retry_after, &body));
        }

        parse_body(&body)
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        "http"
    }

    async fn analyze(&self, samples: &[SampleDescriptor]) -> AnalyzeResponse {
        debug!(
            endpoint = %self.endpoint,
            sample_count = samples.len(),
            "Posting batch to analysis service"
        );
        self.post_batch(samples).await
    }
}

/// Map a non-success HTTP status to a batch-level failure
fn failure_for_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> AnalyzeFailure {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => FailureKind::ServiceUnavailable,
        StatusCode::BAD_REQUEST => FailureKind::InvalidConfiguration,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FailureKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimited,
        s if s.is_server_error() => FailureKind::Network,
        _ => FailureKind::InvalidConfiguration,
    };

    let mut failure = AnalyzeFailure::new(kind, format!("Analysis service returned {}: {}", status, body.trim()));
    if let Some(delay) = retry_after {
        failure = failure.with_retry_after(delay);
    }
    failure
}

/// Parse a 2xx reply body
fn parse_body(body: &str) -> AnalyzeResponse {
    let wire: WireResponse = match serde_json::from_str(body) {
        Ok(wire) => wire,
        Err(e) => {
            return AnalyzeResponse::Batch(AnalyzeFailure::new(
                FailureKind::Network,
                format!("Failed to parse Analyze response: {}", e),
            ))
        }
    };

    if let Some(error) = wire.error {
        return AnalyzeResponse::Batch(error.into_failure());
    }

    let results = wire
        .results
        .unwrap_or_default()
        .into_iter()
        .map(|entry| {
            let id = SampleId::from_content_hash(entry.id);
            match (entry.result, entry.error) {
                (_, Some(error)) => SampleResult {
                    id,
                    result: Err(error.into_failure()),
                },
                (Some(payload), None) => SampleResult::ok(id, payload),
                (None, None) => SampleResult::failed(id, FailureKind::MissingResult, "Entry had neither result nor error"),
            }
        })
        .collect();

    AnalyzeResponse::PerSample(results)
}
