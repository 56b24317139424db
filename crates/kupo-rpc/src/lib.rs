#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]
#![deny(clippy::disallowed_types)]

//! Minimal client for the Kupo chain-index HTTP API.
//!
//! Only the two read endpoints the indexer needs are covered:
//! `GET /matches/{pattern}?unspent` and `GET /datums/{hash}`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the Kupo client.
#[derive(Debug, Clone)]
pub struct KupoConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry_max: u32,
}

impl KupoConfig {
    pub const DEFAULT_PROTOCOL: &'static str = "http";
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 1442;
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
    /// One attempt per call; callers that poll retry on their next tick.
    pub const DEFAULT_RETRY_MAX: u32 = 1;

    pub fn from_parts(protocol: &str, host: &str, port: u16) -> Self {
        Self {
            base_url: format!("{protocol}://{host}:{port}"),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            retry_max: Self::DEFAULT_RETRY_MAX,
        }
    }

    /// Reads `KUPO_API_PROTOCOL`, `KUPO_API_HOST`, `KUPO_API_PORT`,
    /// `KUPO_TIMEOUT_MS` and `KUPO_RETRY_MAX`; every variable is optional.
    pub fn from_env() -> Result<Self, KupoError> {
        let protocol = std::env::var("KUPO_API_PROTOCOL")
            .unwrap_or_else(|_| Self::DEFAULT_PROTOCOL.to_string());
        let host =
            std::env::var("KUPO_API_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string());
        let port = match std::env::var("KUPO_API_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| KupoError::Config(format!("KUPO_API_PORT is not a port: {raw}")))?,
            Err(_) => Self::DEFAULT_PORT,
        };
        if !matches!(protocol.as_str(), "http" | "https") {
            return Err(KupoError::Config(format!(
                "KUPO_API_PROTOCOL must be http or https, got {protocol}"
            )));
        }

        let mut cfg = Self::from_parts(&protocol, &host, port);
        cfg.timeout_ms = std::env::var("KUPO_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_MS);
        cfg.retry_max = std::env::var("KUPO_RETRY_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::DEFAULT_RETRY_MAX);
        Ok(cfg)
    }
}

#[derive(Debug, Error)]
pub enum KupoError {
    #[error("config error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status} body={body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl KupoError {
    /// Whether a later attempt could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            KupoError::Network(_) => true,
            KupoError::HttpStatus { status, .. } => *status >= 500,
            KupoError::Config(_) | KupoError::Decode(_) => false,
        }
    }
}

/// Value held by a match: lovelace plus assets keyed `policy` or `policy.name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchValue {
    pub coins: u64,
    #[serde(default)]
    pub assets: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatumType {
    Hash,
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub slot_no: u64,
    pub header_hash: String,
}

/// One entry of `GET /matches`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Match {
    pub transaction_id: String,
    pub output_index: u32,
    pub address: String,
    pub value: MatchValue,
    #[serde(default)]
    pub datum_hash: Option<String>,
    #[serde(default)]
    pub datum_type: Option<DatumType>,
    #[serde(default)]
    pub script_hash: Option<String>,
    #[serde(default)]
    pub created_at: Option<Point>,
    #[serde(default)]
    pub spent_at: Option<Point>,
}

/// Body of `GET /datums/{hash}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatumResponse {
    /// Hex-encoded CBOR.
    pub datum: String,
}

#[derive(Clone)]
pub struct KupoClient {
    cfg: KupoConfig,
    client: reqwest::Client,
}

impl KupoClient {
    pub fn new(cfg: KupoConfig) -> Result<Self, KupoError> {
        if cfg.base_url.trim().is_empty() {
            return Err(KupoError::Config("base_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| KupoError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    /// Unspent outputs matching `pattern` (an address or a pattern Kupo accepts).
    pub async fn matches_unspent(&self, pattern: &str) -> Result<Vec<Match>, KupoError> {
        let url = format!("{}?unspent", self.join(&format!("/matches/{pattern}")));
        self.get_json("matches", &url).await
    }

    /// Raw datum for `hash`, or `None` when Kupo does not know it.
    pub async fn datum(&self, hash: &str) -> Result<Option<DatumResponse>, KupoError> {
        let url = self.join(&format!("/datums/{hash}"));
        let found: Option<Option<DatumResponse>> = self.get_json_optional("datum", &url).await?;
        Ok(found.flatten())
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T>(&self, op: &'static str, url: &str) -> Result<T, KupoError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let attempts = self.cfg.retry_max.max(1);
        for attempt in 1..=attempts {
            debug!(operation = op, attempt, url = %url, "sending request");
            let resp = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(operation = op, attempt, error = %err, "request error");
                    if attempt == attempts || !is_retryable(&err) {
                        return Err(map_reqwest_error(err));
                    }
                    backoff(op, attempt).await;
                    continue;
                }
            };
            match Self::map_response(op, resp).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt == attempts || !is_retryable_status(&err) {
                        return Err(err);
                    }
                    backoff(op, attempt).await;
                }
            }
        }
        Err(KupoError::Config(
            "retry loop exhausted unexpectedly".to_string(),
        ))
    }

    async fn get_json_optional<T>(
        &self,
        op: &'static str,
        url: &str,
    ) -> Result<Option<T>, KupoError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let attempts = self.cfg.retry_max.max(1);
        for attempt in 1..=attempts {
            let resp = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt == attempts || !is_retryable(&err) {
                        return Err(map_reqwest_error(err));
                    }
                    backoff(op, attempt).await;
                    continue;
                }
            };
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            match Self::map_response(op, resp).await {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(err) => {
                    if attempt == attempts || !is_retryable_status(&err) {
                        return Err(err);
                    }
                    backoff(op, attempt).await;
                }
            }
        }
        Err(KupoError::Config(
            "retry loop exhausted unexpectedly".to_string(),
        ))
    }

    async fn map_response<T>(op: &'static str, resp: reqwest::Response) -> Result<T, KupoError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| KupoError::Network(format!("{e}")))?;
        if !status.is_success() {
            warn!(operation = op, status = status.as_u16(), body = %body, "non-success status");
            return Err(KupoError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| KupoError::Decode(format!("{e}")))
            .inspect(|_parsed| {
                debug!(operation = op, "response decoded");
            })
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn is_retryable_status(err: &KupoError) -> bool {
    matches!(err, KupoError::HttpStatus { status, .. } if *status >= 500)
}

fn map_reqwest_error(err: reqwest::Error) -> KupoError {
    if err.is_body() || err.is_decode() {
        return KupoError::Decode(err.to_string());
    }
    KupoError::Network(err.to_string())
}

async fn backoff(op: &str, attempt: u32) {
    let delay_ms = backoff_delay_ms(attempt);
    warn!(operation = op, attempt, delay_ms, "retrying after backoff");
    sleep(Duration::from_millis(delay_ms)).await;
}

fn backoff_delay_ms(attempt: u32) -> u64 {
    // Deterministic exponential backoff, capped at 2s.
    let exp = attempt.saturating_sub(1);
    let base = 100u64.saturating_mul(2u64.saturating_pow(exp));
    base.min(2_000)
}
