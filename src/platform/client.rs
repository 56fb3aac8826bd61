//! Commerce platform HTTP client.
//!
//! The core never branches on reqwest errors directly: every call funnels into
//! an [`ApiResponse`] carrying status, parsed body and the raw text for
//! diagnostics. Non-2xx statuses are NOT errors at this layer; callers decide
//! what a 404 or 409 means for their entity. Transport-level retry (429/5xx)
//! happens here, against the shared [`RateGate`] watermark.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::gate::{backoff_delay, RateGate};

const MAX_TRANSPORT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub raw: String,
}

impl ApiResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn not_found(&self) -> bool {
        self.status == 404
    }

    /// Raw body clipped for ledger diagnostics.
    pub fn raw_clipped(&self, max: usize) -> String {
        if self.raw.len() <= max {
            self.raw.clone()
        } else {
            let mut end = max;
            while !self.raw.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &self.raw[..end])
        }
    }
}

/// The platform API surface the migration core needs. Kept deliberately thin
/// (verb + path) so a recording fake can stand in for the whole platform in
/// tests.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    async fn get(&self, store_id: &str, path: &str, query: &[(String, String)])
        -> Result<ApiResponse>;
    async fn post(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse>;
    async fn put(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse>;
}

pub struct HttpCommerceApi {
    http: reqwest::Client,
    base_url: String,
    tokens: HashMap<String, String>,
    gate: RateGate,
}

impl HttpCommerceApi {
    pub fn new(base_url: impl Into<String>, tokens: HashMap<String, String>, gate: RateGate) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            gate,
        })
    }

    fn url(&self, store_id: &str, path: &str) -> String {
        format!(
            "{}/stores/{}/{}",
            self.base_url,
            urlencoding::encode(store_id),
            path.trim_start_matches('/')
        )
    }

    fn bearer(&self, store_id: &str) -> Result<&str> {
        self.tokens
            .get(store_id)
            .map(String::as_str)
            .with_context(|| format!("no token for store {store_id}"))
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<ApiResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.gate.wait_ready().await;

            let sent = build().send().await;
            match sent {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retry_after = parse_retry_after(resp.headers());
                    let raw = resp.text().await.unwrap_or_default();
                    let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                    let response = ApiResponse { status, body, raw };

                    if retryable_status(status) && attempt < MAX_TRANSPORT_ATTEMPTS {
                        let delay = backoff_delay(attempt, retry_after);
                        warn!(
                            status,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "platform throttled/unavailable; backing off"
                        );
                        // Everyone in the process waits, not just this call.
                        self.gate.push_back(delay);
                        continue;
                    }
                    if !response.ok() {
                        debug!(status, "platform call returned non-ok status");
                    }
                    return Ok(response);
                }
                Err(e) if attempt < MAX_TRANSPORT_ATTEMPTS => {
                    let delay = backoff_delay(attempt, None);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "transport error; retrying");
                    self.gate.push_back(delay);
                }
                Err(e) => return Err(e).context("platform request failed after retries"),
            }
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl CommerceApi for HttpCommerceApi {
    async fn get(
        &self,
        store_id: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse> {
        let url = self.url(store_id, path);
        let token = self.bearer(store_id)?.to_string();
        let query = query.to_vec();
        self.send_with_retry(|| {
            self.http
                .get(&url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(&query)
        })
        .await
    }

    async fn post(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse> {
        let url = self.url(store_id, path);
        let token = self.bearer(store_id)?.to_string();
        self.send_with_retry(|| {
            self.http
                .post(&url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(body)
        })
        .await
    }

    async fn put(&self, store_id: &str, path: &str, body: &Value) -> Result<ApiResponse> {
        let url = self.url(store_id, path);
        let token = self.bearer(store_id)?.to_string();
        self.send_with_retry(|| {
            self.http
                .put(&url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(body)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(retryable_status(429));
        assert!(retryable_status(500));
        assert!(retryable_status(503));
        assert!(!retryable_status(404));
        assert!(!retryable_status(409));
        assert!(!retryable_status(200));
    }

    #[test]
    fn raw_clipped_respects_char_boundaries() {
        let resp = ApiResponse {
            status: 400,
            body: Value::Null,
            raw: "héllo wörld, this is a long diagnostic body".into(),
        };
        let clipped = resp.raw_clipped(8);
        assert!(clipped.chars().count() <= 9); // 8 + ellipsis
        assert!(clipped.ends_with('…'));
        let short = resp.raw_clipped(1000);
        assert_eq!(short, resp.raw);
    }

    #[test]
    fn url_encodes_store_ids() {
        let api = HttpCommerceApi::new(
            "https://api.example.test/v3/",
            HashMap::new(),
            RateGate::new(),
        )
        .unwrap();
        assert_eq!(
            api.url("store one", "products"),
            "https://api.example.test/v3/stores/store%20one/products"
        );
    }
}
