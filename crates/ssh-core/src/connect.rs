//! Connection establishment and host-key capture.
//!
//! The host key is observed and classified *during* the handshake, before
//! authentication, through the russh `check_server_key` hook. The
//! observation is recorded in a shared slot so it is available to the
//! caller even when the connection attempt itself is rejected; this is
//! what lets the bridge show the fingerprint to the user and retry after
//! an explicit trust decision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::client;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use sg_types::{Credential, HostKeyObservation, HostKeyStatus};
use tracing::{debug, info};

use crate::error::{SshCoreError, SshResult};
use crate::files::FileSession;
use crate::keys::load_private_key;
use crate::shell::{spawn_shell, ShellChannel};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const TERM: &str = "xterm-256color";

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Fingerprint stored for this target, if any; drives classification.
    pub known_fingerprint: Option<String>,
}

impl ConnectSpec {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An authenticated connection to a remote host.
pub struct RemoteConnection {
    handle: client::Handle<HostKeyCapture>,
    address: String,
}

impl RemoteConnection {
    /// Open an interactive shell with a PTY at the given provisional size.
    pub async fn open_shell(&self, rows: u16, cols: u16) -> SshResult<ShellChannel> {
        let channel = self.handle.channel_open_session().await?;
        channel
            .request_pty(true, TERM, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;
        Ok(spawn_shell(channel))
    }

    /// Open the SFTP subsystem, consuming the connection. The returned
    /// session owns the connection and closes it on drop/close.
    pub async fn into_files(self) -> SshResult<FileSession> {
        FileSession::open(self).await
    }

    pub(crate) fn handle(&self) -> &client::Handle<HostKeyCapture> {
        &self.handle
    }

    pub async fn close(&self) {
        debug!(host = %self.address, "closing remote connection");
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }
}

/// Connect and authenticate against `spec` with the given credential.
///
/// Always returns the host-key observation on success. When the observed
/// key mismatches the stored fingerprint and `allow_mismatch` is false the
/// attempt fails with [`SshCoreError::HostKeyRejected`], which still
/// carries the observation so the caller can ask the user and retry.
pub async fn connect(
    spec: &ConnectSpec,
    credential: &Credential,
    allow_mismatch: bool,
) -> SshResult<(RemoteConnection, HostKeyObservation)> {
    if !credential.has_auth_method() {
        return Err(SshCoreError::NoAuthMethod);
    }

    // Parse key material up front so a bad key fails before we dial.
    let private_key = match credential.private_key.as_deref() {
        Some(data) if !data.is_empty() => Some(load_private_key(data, credential.passphrase.as_deref())?),
        _ => None,
    };

    let config = Arc::new(client::Config {
        nodelay: true,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    });

    let observed = Arc::new(Mutex::new(None));
    let handler = HostKeyCapture {
        known_fingerprint: spec.known_fingerprint.clone(),
        allow_mismatch,
        observed: Arc::clone(&observed),
    };

    let address = spec.address();
    debug!(host = %address, user = %spec.username, "dialing remote host");

    let connect_result = tokio::time::timeout(
        DIAL_TIMEOUT,
        client::connect(config, (spec.host.as_str(), spec.port), handler),
    )
    .await;

    let mut handle = match connect_result {
        Err(_) => {
            return Err(SshCoreError::DialTimeout {
                address,
                seconds: DIAL_TIMEOUT.as_secs(),
            });
        }
        Ok(Err(err)) => {
            // A rejected mismatch surfaces as a generic handshake error
            // from russh; recover the observation for the caller.
            let slot = observed.lock().expect("host key slot poisoned").clone();
            if let Some(observation) = slot {
                if observation.status == HostKeyStatus::Mismatch && !allow_mismatch {
                    return Err(SshCoreError::HostKeyRejected {
                        host: address,
                        observation,
                    });
                }
            }
            return Err(err.into());
        }
        Ok(Ok(handle)) => handle,
    };

    let observation = observed
        .lock()
        .expect("host key slot poisoned")
        .clone()
        .ok_or_else(|| SshCoreError::NoHostKey { host: address.clone() })?;

    authenticate(&mut handle, spec, credential, private_key).await?;

    info!(host = %address, user = %spec.username, status = ?observation.status, "remote session authenticated");
    Ok((RemoteConnection { handle, address }, observation))
}

/// Password first, then public key; first success wins.
async fn authenticate(
    handle: &mut client::Handle<HostKeyCapture>,
    spec: &ConnectSpec,
    credential: &Credential,
    private_key: Option<russh::keys::PrivateKey>,
) -> SshResult<()> {
    if let Some(password) = credential.password.as_deref() {
        if !password.is_empty() {
            let result = handle
                .authenticate_password(spec.username.clone(), password)
                .await?;
            if result.success() {
                return Ok(());
            }
            debug!(host = %spec.address(), "password authentication rejected");
        }
    }

    if let Some(key) = private_key {
        let rsa_hint = handle.best_supported_rsa_hash().await.unwrap_or(None).flatten();
        let is_rsa = matches!(key.algorithm(), russh::keys::Algorithm::Rsa { .. });
        let hash_alg = if is_rsa { rsa_hint } else { None };
        let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
        let result = handle
            .authenticate_publickey(spec.username.clone(), key)
            .await?;
        if result.success() {
            return Ok(());
        }
        debug!(host = %spec.address(), "public key authentication rejected");
    }

    Err(SshCoreError::AuthFailed {
        host: spec.address(),
    })
}

/// russh client handler that records the presented host key.
pub struct HostKeyCapture {
    known_fingerprint: Option<String>,
    allow_mismatch: bool,
    observed: Arc<Mutex<Option<HostKeyObservation>>>,
}

impl client::Handler for HostKeyCapture {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let status = HostKeyStatus::classify(self.known_fingerprint.as_deref(), &fingerprint);
        *self.observed.lock().expect("host key slot poisoned") = Some(HostKeyObservation {
            fingerprint,
            status,
        });
        // Rejecting here aborts the handshake; the caller translates the
        // resulting error using the recorded observation.
        Ok(self.allow_mismatch || status != HostKeyStatus::Mismatch)
    }
}
