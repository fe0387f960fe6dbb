use sg_types::HostKeyObservation;
use thiserror::Error;

/// Errors from the outbound SSH/SFTP connector.
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Credential carries neither a password nor a private key.
    #[error("no authentication method provided")]
    NoAuthMethod,

    /// Supplied private key (or key/passphrase combination) is unusable.
    #[error("failed to parse private key: {0}")]
    KeyParse(String),

    /// The remote host rejected every offered authentication method.
    #[error("authentication rejected by {host}")]
    AuthFailed { host: String },

    /// The connect attempt did not complete within the dial bound.
    #[error("connection to {address} timed out after {seconds}s")]
    DialTimeout { address: String, seconds: u64 },

    /// Host key mismatch with mismatches disallowed. Carries the observed
    /// fingerprint and classification so the caller can drive a trust
    /// decision and retry.
    #[error("host key mismatch for {host}: observed {}", observation.fingerprint)]
    HostKeyRejected {
        host: String,
        observation: HostKeyObservation,
    },

    /// Handshake finished without the host key ever being presented.
    /// Indicates a protocol-level failure, not a trust decision.
    #[error("handshake with {host} ended before a host key was observed")]
    NoHostKey { host: String },

    #[error("remote path not found: {path}")]
    NotFound { path: String },

    #[error("path is a directory: {path}")]
    IsDirectory { path: String },

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Whether this error may be resolved by a user trust decision
    /// followed by a retry with mismatches allowed.
    pub fn is_host_key_rejection(&self) -> bool {
        matches!(self, Self::HostKeyRejected { .. })
    }
}
