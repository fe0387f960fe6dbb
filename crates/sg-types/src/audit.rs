use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SshConnect,
    SshDisconnect,
}

/// Session lifecycle event published to the audit sink.
///
/// Delivery is fire-and-forget: the bridge never waits on, or fails
/// because of, the consumer of these events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub target_id: i64,
    pub owner_id: i64,
    pub target_name: String,
    pub detail: String,
    /// Failure reason when the session ended abnormally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub at: DateTime<Utc>,
}
