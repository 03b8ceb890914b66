use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::GasPayload;

pub use crate::domain::gas_payload::{
    build_inspection_payload, build_maintenance_payload, build_payload,
};

const CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
const SECURE_SCHEME: &str = "https://";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync url must use https")]
    InsecureUrl,
    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("sync transport failed: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait GasTransport: Send + Sync {
    /// POSTs `body` and returns the final HTTP status.
    async fn post_text(&self, url: &str, body: String) -> Result<u16, TransportError>;
}

#[derive(Clone, Default)]
pub struct ReqwestGasTransport {
    client: reqwest::Client,
}

impl ReqwestGasTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GasTransport for ReqwestGasTransport {
    async fn post_text(&self, url: &str, body: String) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|error| TransportError(error.to_string()))?;

        Ok(response.status().as_u16())
    }
}

pub fn is_secure_url(url: &str) -> bool {
    url.starts_with(SECURE_SCHEME)
}

/// `Ok(false)` means the payload should stay queued; the url check happens
/// before any I/O.
pub async fn send(
    transport: &dyn GasTransport,
    url: &str,
    payload: &GasPayload,
) -> Result<bool, SyncError> {
    if !is_secure_url(url) {
        return Err(SyncError::InsecureUrl);
    }

    let body = serde_json::to_string(payload)?;

    match transport.post_text(url, body).await {
        Ok(status) if (200..300).contains(&status) => {
            tracing::debug!(id = payload.id(), kind = payload.kind(), status, "payload sent");
            Ok(true)
        }
        Ok(status) => {
            tracing::warn!(
                id = payload.id(),
                kind = payload.kind(),
                status,
                "sync endpoint rejected payload"
            );
            Ok(false)
        }
        Err(error) => {
            tracing::warn!(id = payload.id(), kind = payload.kind(), error = %error, "sync post failed");
            Ok(false)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub sent: Vec<GasPayload>,
    pub remaining: Vec<GasPayload>,
    pub sent_count: usize,
}

/// Sends the queue front to back, one request at a time. Items that fail
/// keep their relative order; nothing is ever dropped.
pub async fn retry_queue(
    transport: &dyn GasTransport,
    url: &str,
    queue: Vec<GasPayload>,
    is_online: bool,
) -> RetryOutcome {
    if queue.is_empty() || !is_online || url.trim().is_empty() {
        return RetryOutcome {
            sent: Vec::new(),
            remaining: queue,
            sent_count: 0,
        };
    }

    if !is_secure_url(url) {
        tracing::warn!(queued = queue.len(), "sync url is not https; keeping queue");
        return RetryOutcome {
            sent: Vec::new(),
            remaining: queue,
            sent_count: 0,
        };
    }

    let mut sent = Vec::new();
    let mut remaining = Vec::new();

    for item in queue {
        match send(transport, url, &item).await {
            Ok(true) => sent.push(item),
            Ok(false) => remaining.push(item),
            Err(error) => {
                tracing::warn!(id = item.id(), error = %error, "keeping payload queued");
                remaining.push(item);
            }
        }
    }

    let sent_count = sent.len();
    tracing::info!(sent_count, remaining = remaining.len(), "offline queue drained");

    RetryOutcome {
        sent,
        remaining,
        sent_count,
    }
}
