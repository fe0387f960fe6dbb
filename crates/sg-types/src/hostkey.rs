use serde::{Deserialize, Serialize};

/// Outcome of comparing a freshly observed host-key fingerprint against the
/// fingerprint stored for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyStatus {
    /// No fingerprint stored yet; first contact with this host.
    New,
    /// Stored and observed fingerprints are equal.
    Match,
    /// Stored and observed fingerprints differ.
    Mismatch,
}

impl HostKeyStatus {
    /// Classify an observed fingerprint against the stored one.
    ///
    /// An empty stored value is treated the same as an absent one.
    pub fn classify(stored: Option<&str>, observed: &str) -> Self {
        match stored {
            None => Self::New,
            Some(s) if s.is_empty() => Self::New,
            Some(s) if s == observed => Self::Match,
            Some(_) => Self::Mismatch,
        }
    }

    /// Whether this classification requires explicit user confirmation
    /// before a session may proceed.
    pub fn needs_confirmation(self) -> bool {
        !matches!(self, Self::Match)
    }
}

/// What the connector saw during the handshake: the remote host's key
/// fingerprint and how it compares to the stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyObservation {
    /// SHA-256 fingerprint in OpenSSH presentation ("SHA256:...").
    pub fingerprint: String,
    pub status: HostKeyStatus,
}
