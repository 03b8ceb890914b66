use serde::Serialize;

use crate::domain::session_state::TimestampMs;

pub const DEFAULT_TOAST_DURATION_MS: i64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
    pub created_at: i64,
    pub duration_ms: i64,
}

impl Toast {
    fn expired(&self, now: TimestampMs) -> bool {
        now.0 >= self.created_at + self.duration_ms
    }
}

/// In-memory toast queue. Ids increase monotonically for the lifetime of
/// the process; nothing here is persisted.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    next_id: u64,
    toasts: Vec<Toast>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>, kind: ToastKind, now: TimestampMs) -> u64 {
        self.push_with_duration(message, kind, now, DEFAULT_TOAST_DURATION_MS)
    }

    pub fn push_with_duration(
        &mut self,
        message: impl Into<String>,
        kind: ToastKind,
        now: TimestampMs,
        duration_ms: i64,
    ) -> u64 {
        self.prune(now);
        self.next_id += 1;
        let toast = Toast {
            id: self.next_id,
            message: message.into(),
            kind,
            created_at: now.0,
            duration_ms,
        };
        tracing::debug!(toast_id = toast.id, kind = ?toast.kind, "toast queued");
        self.toasts.push(toast);
        self.next_id
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|toast| toast.id != id);
        self.toasts.len() != before
    }

    /// Drops expired toasts and returns the ones still visible, oldest first.
    pub fn active(&mut self, now: TimestampMs) -> Vec<Toast> {
        self.prune(now);
        self.toasts.clone()
    }

    fn prune(&mut self, now: TimestampMs) {
        self.toasts.retain(|toast| !toast.expired(now));
    }
}
