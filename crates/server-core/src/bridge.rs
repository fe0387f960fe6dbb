//! The session bridge: one browser connection, one remote shell.
//!
//! A session walks a fixed ladder of states and every inbound frame is
//! matched against the set valid for the current state. Anything outside
//! that set is a protocol violation and ends the session; nothing is
//! silently ignored.
//!
//! ```text
//! Ready -> AwaitingAuth -> Connecting -> [AwaitingHostKeyConfirmation] ->
//! ShellActive -> Closed
//! ```
//!
//! The host-key prompt is skipped when the observed key matches the stored
//! fingerprint. Plaintext credentials exist only between decryption and
//! the connect call.

use std::sync::Arc;
use std::time::Duration;

use sg_types::messages::decode_payload;
use sg_types::{Envelope, HostKeyObservation, HostKeyStatus, TargetRecord};
use ssh_core::{ConnectSpec, ShellChannel};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::connector::{Connector, RemoteHandle};
use crate::error::BridgeError;
use crate::registry::SessionRegistry;
use crate::store::TargetStore;
use crate::transport::{TransportError, TransportSink, TransportStream};
use crate::vault::Vault;

/// How long the client has to present key material after `ready`.
const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the user has to answer the host-key prompt.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
/// Pause between a fatal `error` frame and the transport close, so the
/// frame reaches the browser before the socket drops.
const ERROR_GRACE: Duration = Duration::from_millis(100);

const OUTPUT_CHUNK: usize = 4096;
const OUTBOUND_BUFFER: usize = 64;
const INITIAL_ROWS: u16 = 24;
const INITIAL_COLS: u16 = 80;

/// Shared collaborators for running bridge sessions.
#[derive(Clone)]
pub struct Bridge {
    pub store: Arc<dyn TargetStore>,
    pub connector: Arc<dyn Connector>,
    pub vault: Arc<Vault>,
    pub registry: Arc<SessionRegistry>,
    pub audit: AuditSink,
}

impl Bridge {
    /// Run one session to completion. Consumes the transport; on error the
    /// client receives a sanitized `error` frame before the close.
    pub async fn run_session<S, R>(&self, target_id: i64, owner_id: i64, mut sink: S, mut stream: R)
    where
        S: TransportSink,
        R: TransportStream,
    {
        if let Err(err) = self.drive(target_id, owner_id, &mut sink, &mut stream).await {
            warn!(target_id, owner_id, error = %err, "session ended with error");
            if sink.send(Envelope::error(err.client_message())).await.is_ok() {
                tokio::time::sleep(ERROR_GRACE).await;
            }
        }
        sink.close().await;
    }

    async fn drive<S, R>(
        &self,
        target_id: i64,
        owner_id: i64,
        sink: &mut S,
        stream: &mut R,
    ) -> Result<(), BridgeError>
    where
        S: TransportSink,
        R: TransportStream,
    {
        sink.send(Envelope::Ready).await?;

        let user_key = await_auth(stream).await?;
        let target = self.store.fetch(target_id, owner_id).await?;
        let credential = self.vault.decrypt_credential(&user_key, &target.encrypted_credential)?;

        // Mismatches are allowed at the transport level so the observation
        // reaches the user; the trust decision happens below, not in the
        // handshake.
        let spec = connect_spec(&target);
        let (remote, observation) = self.connector.connect(&spec, &credential, true).await?;
        drop(credential);

        let result = self
            .established(target_id, owner_id, &target, &spec, remote.as_ref(), observation, sink, stream)
            .await;
        remote.close().await;
        result
    }

    /// Everything after a successful connect: the trust decision, shell
    /// startup, and the relay. The caller closes the remote connection.
    #[allow(clippy::too_many_arguments)]
    async fn established<S, R>(
        &self,
        target_id: i64,
        owner_id: i64,
        target: &TargetRecord,
        spec: &ConnectSpec,
        remote: &dyn RemoteHandle,
        observation: HostKeyObservation,
        sink: &mut S,
        stream: &mut R,
    ) -> Result<(), BridgeError>
    where
        S: TransportSink,
        R: TransportStream,
    {
        if observation.status.needs_confirmation() {
            confirm_host_key(sink, stream, &observation, target.host_fingerprint.clone()).await?;
            if observation.status == HostKeyStatus::Mismatch {
                warn!(
                    target_id,
                    host = %target.host,
                    "user accepted a changed host key; replacing stored fingerprint"
                );
            }
            self.store
                .store_fingerprint(target_id, owner_id, &observation.fingerprint)
                .await?;
        }

        let shell = remote.open_shell(INITIAL_ROWS, INITIAL_COLS).await?;
        sink.send(Envelope::Connected {
            host_key: observation.fingerprint.clone(),
        })
        .await?;

        self.registry
            .register(target_id, owner_id, &target.name, &spec.address());
        self.audit.connected(target, owner_id);
        info!(target_id, owner_id, host = %spec.address(), "shell session established");

        let result = relay(sink, stream, shell).await;

        self.registry.remove(target_id, owner_id);
        let failure = result
            .as_ref()
            .err()
            .filter(|err| err.is_session_failure())
            .map(|err| err.client_message());
        self.audit.disconnected(target, owner_id, failure);
        info!(target_id, owner_id, host = %spec.address(), "shell session ended");
        result
    }
}

fn connect_spec(target: &TargetRecord) -> ConnectSpec {
    ConnectSpec {
        host: target.host.clone(),
        port: target.port,
        username: target.username.clone(),
        known_fingerprint: target.host_fingerprint.clone(),
    }
}

/// AwaitingAuth: exactly one frame is acceptable here.
async fn await_auth<R: TransportStream>(stream: &mut R) -> Result<String, BridgeError> {
    match tokio::time::timeout(AUTH_TIMEOUT, stream.next()).await {
        Err(_) => Err(BridgeError::AuthTimeout),
        Ok(Err(err)) => Err(err.into()),
        Ok(Ok(None)) => Err(TransportError::Closed.into()),
        Ok(Ok(Some(Envelope::Auth { key }))) => Ok(key),
        Ok(Ok(Some(other))) => Err(violation("awaiting authentication", &other)),
    }
}

/// AwaitingHostKeyConfirmation: present the observation, wait for the
/// user's verdict. Pings keep the connection alive while they decide.
async fn confirm_host_key<S, R>(
    sink: &mut S,
    stream: &mut R,
    observation: &HostKeyObservation,
    stored_key: Option<String>,
) -> Result<(), BridgeError>
where
    S: TransportSink,
    R: TransportStream,
{
    sink.send(Envelope::HostKeyVerify {
        status: observation.status,
        fingerprint: observation.fingerprint.clone(),
        stored_key,
    })
    .await?;

    let verdict = tokio::time::timeout(CONFIRM_TIMEOUT, async {
        loop {
            match stream.next().await {
                Err(err) => return Err(BridgeError::from(err)),
                Ok(None) => return Err(TransportError::Closed.into()),
                Ok(Some(Envelope::HostKeyConfirm { accept })) => return Ok(accept),
                Ok(Some(Envelope::Ping)) => sink.send(Envelope::Pong).await.map_err(BridgeError::from)?,
                Ok(Some(other)) => return Err(violation("awaiting host key confirmation", &other)),
            }
        }
    })
    .await
    .map_err(|_| BridgeError::ConfirmTimeout)??;

    if verdict {
        Ok(())
    } else {
        Err(BridgeError::HostKeyDeclined)
    }
}

/// ShellActive: full-duplex relay between the transport and the shell.
///
/// Output pumps run as their own tasks so a stalled browser cannot block
/// shell reads beyond the bounded queue, while the transport sink stays
/// owned by this loop.
async fn relay<S, R>(sink: &mut S, stream: &mut R, shell: ShellChannel) -> Result<(), BridgeError>
where
    S: TransportSink,
    R: TransportStream,
{
    let (input, stdout_rx, stderr_rx, closed) = shell.into_parts();
    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_BUFFER);

    let stdout_pump = tokio::spawn(pump_output(stdout_rx, out_tx.clone(), closed.clone()));
    let stderr_pump = tokio::spawn(pump_output(stderr_rx, out_tx.clone(), closed.clone()));
    drop(out_tx);

    let result = loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(envelope) => {
                    if let Err(err) = sink.send(envelope).await {
                        break Err(err.into());
                    }
                }
                // Both pumps are done: the shell has ended.
                None => break Ok(()),
            },
            frame = stream.next() => match frame {
                Err(err) => break Err(err.into()),
                Ok(None) => break Ok(()),
                Ok(Some(Envelope::Input { data })) => {
                    let bytes = match decode_payload(&data) {
                        Ok(bytes) => bytes,
                        Err(_) => break Err(BridgeError::ProtocolViolation(
                            "input payload is not valid base64".into(),
                        )),
                    };
                    if input.write(bytes).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(Some(Envelope::Resize { rows, cols })) => input.resize(rows, cols),
                Ok(Some(Envelope::Ping)) => {
                    if let Err(err) = sink.send(Envelope::Pong).await {
                        break Err(err.into());
                    }
                }
                Ok(Some(other)) => break Err(violation("shell is active", &other)),
            },
        }
    };

    closed.cancel();
    let _ = stdout_pump.await;
    let _ = stderr_pump.await;
    result
}

/// Forward one shell output stream into the outbound queue, re-chunked so
/// no single frame exceeds the output chunk size.
async fn pump_output(
    mut rx: mpsc::Receiver<Vec<u8>>,
    out_tx: mpsc::Sender<Envelope>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            maybe = rx.recv() => match maybe {
                None => break,
                Some(bytes) => {
                    for chunk in bytes.chunks(OUTPUT_CHUNK) {
                        if out_tx.send(Envelope::output(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
            },
        }
    }
}

fn violation(state: &str, envelope: &Envelope) -> BridgeError {
    BridgeError::ProtocolViolation(format!("'{}' not valid while {state}", envelope.kind()))
}
