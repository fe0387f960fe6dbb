//! Bridge error taxonomy.
//!
//! Internal errors keep their full detail for logs; what reaches the
//! browser goes through [`BridgeError::client_message`], which maps every
//! failure to a short, stable message that leaks neither storage layout
//! nor cryptographic specifics.

use ssh_core::SshCoreError;
use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;
use crate::vault::VaultError;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The client never sent its key material within the auth window.
    #[error("timed out waiting for authentication")]
    AuthTimeout,

    /// The client never answered the host-key prompt within the window.
    #[error("timed out waiting for host key confirmation")]
    ConfirmTimeout,

    /// The user declined the presented host key.
    #[error("host key declined by user")]
    HostKeyDeclined,

    /// The client sent a frame that is not valid in the current session
    /// state. Always fatal; the bridge never skips over bad input.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ssh(#[from] SshCoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// The sanitized message sent to the browser before the session closes.
    pub fn client_message(&self) -> String {
        match self {
            Self::AuthTimeout => "Authentication timeout".into(),
            Self::ConfirmTimeout => "Host key verification timeout".into(),
            Self::HostKeyDeclined => "Host key verification rejected".into(),
            Self::ProtocolViolation(detail) => format!("Protocol violation: {detail}"),
            Self::Vault(VaultError::AuthenticationFailed) => "Invalid authentication key".into(),
            Self::Vault(_) => "Stored credential is unreadable".into(),
            Self::Store(StoreError::NotFound { .. }) => "Target not found".into(),
            Self::Store(_) => "Storage error".into(),
            Self::Ssh(err) => ssh_client_message(err),
            Self::Transport(_) => "Connection error".into(),
        }
    }

    /// Whether this outcome should be recorded as a failure in the audit
    /// trail (as opposed to a normal disconnect).
    pub fn is_session_failure(&self) -> bool {
        !matches!(self, Self::Transport(TransportError::Closed))
    }
}

fn ssh_client_message(err: &SshCoreError) -> String {
    match err {
        SshCoreError::NoAuthMethod => "No authentication method configured".into(),
        SshCoreError::KeyParse(_) => "Invalid private key".into(),
        SshCoreError::AuthFailed { .. } => "Authentication failed on remote host".into(),
        SshCoreError::DialTimeout { .. } => "Connection to remote host timed out".into(),
        SshCoreError::HostKeyRejected { .. } => "Host key verification failed".into(),
        _ => "Failed to connect to remote host".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_hide_internal_detail() {
        let err = BridgeError::Store(StoreError::Io(std::io::Error::other("/var/lib/spyglass busted")));
        assert_eq!(err.client_message(), "Storage error");

        let err = BridgeError::Vault(VaultError::AuthenticationFailed);
        assert_eq!(err.client_message(), "Invalid authentication key");

        let err = BridgeError::Ssh(SshCoreError::DialTimeout {
            address: "10.0.0.9:22".into(),
            seconds: 30,
        });
        assert!(!err.client_message().contains("10.0.0.9"));
    }

    #[test]
    fn protocol_violations_name_the_offense() {
        let err = BridgeError::ProtocolViolation("resize before authentication".into());
        assert_eq!(
            err.client_message(),
            "Protocol violation: resize before authentication"
        );
    }
}
