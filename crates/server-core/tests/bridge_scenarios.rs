//! End-to-end bridge sessions over an in-memory transport and a scripted
//! remote, covering the trust-on-first-use flow, reconnects, mismatch
//! rejection, timeouts, and protocol violations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use server_core::transport::TestClient;
use server_core::{
    memory_transport, AuditSink, Bridge, Connector, MemoryTargetStore, RemoteHandle,
    SessionRegistry, Vault,
};
use sg_types::messages::{decode_payload, encode_payload};
use sg_types::{
    AuditKind, AuthType, Credential, Envelope, HostKeyObservation, HostKeyStatus, TargetRecord,
};
use ssh_core::{shell_pipe, ConnectSpec, ShellBackend, ShellChannel, SshCoreError};

const USER_KEY: &str = "user-vault-key";
const SERVER_SECRET: &str = "server-secret";
const FINGERPRINT: &str = "SHA256:mockhostkey0000000000000000000000000000000";

/// Scripted remote: classifies the presented fingerprint exactly like the
/// real connector and hands out echo shells.
struct MockConnector {
    fingerprint: String,
    connects: AtomicUsize,
    remote_closed: Arc<AtomicBool>,
}

impl MockConnector {
    fn new(fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            connects: AtomicUsize::new(0),
            remote_closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        spec: &ConnectSpec,
        _credential: &Credential,
        _allow_mismatch: bool,
    ) -> Result<(Box<dyn RemoteHandle>, HostKeyObservation), SshCoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let observation = HostKeyObservation {
            fingerprint: self.fingerprint.clone(),
            status: HostKeyStatus::classify(spec.known_fingerprint.as_deref(), &self.fingerprint),
        };
        let remote = MockRemote {
            closed: Arc::clone(&self.remote_closed),
        };
        Ok((Box::new(remote), observation))
    }
}

struct MockRemote {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteHandle for MockRemote {
    async fn open_shell(&self, _rows: u16, _cols: u16) -> Result<ShellChannel, SshCoreError> {
        let (shell, backend) = shell_pipe();
        tokio::spawn(echo_shell(backend));
        Ok(shell)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A shell that echoes every input chunk back on stdout.
async fn echo_shell(mut backend: ShellBackend) {
    loop {
        tokio::select! {
            _ = backend.closed.cancelled() => break,
            maybe = backend.input_rx.recv() => match maybe {
                Some(bytes) => {
                    if backend.stdout_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    backend.closed.cancel();
}

struct Harness {
    bridge: Bridge,
    store: Arc<MemoryTargetStore>,
    connector: Arc<MockConnector>,
    registry: Arc<SessionRegistry>,
    audit_rx: tokio::sync::mpsc::UnboundedReceiver<sg_types::AuditEvent>,
}

fn harness(stored_fingerprint: Option<&str>) -> Harness {
    let vault = Arc::new(Vault::new(SERVER_SECRET.to_string().into()));
    let store = Arc::new(MemoryTargetStore::new());
    let encrypted = vault
        .encrypt_credential(USER_KEY, &Credential::password("remote-pw"))
        .unwrap();
    store
        .insert(
            1,
            TargetRecord {
                id: 7,
                name: "web-1".into(),
                host: "10.0.0.7".into(),
                port: 22,
                username: "deploy".into(),
                auth_type: AuthType::Password,
                encrypted_credential: encrypted.clone(),
                host_fingerprint: stored_fingerprint.map(str::to_string),
            },
        )
        .unwrap();
    // Second, already-trusted target for multi-session tests.
    store
        .insert(
            1,
            TargetRecord {
                id: 8,
                name: "web-2".into(),
                host: "10.0.0.8".into(),
                port: 22,
                username: "deploy".into(),
                auth_type: AuthType::Password,
                encrypted_credential: encrypted,
                host_fingerprint: Some(FINGERPRINT.to_string()),
            },
        )
        .unwrap();

    let connector = Arc::new(MockConnector::new(FINGERPRINT));
    let registry = Arc::new(SessionRegistry::new());
    let (audit, audit_rx) = AuditSink::channel();
    let bridge = Bridge {
        store: store.clone(),
        connector: connector.clone(),
        vault,
        registry: registry.clone(),
        audit,
    };
    Harness {
        bridge,
        store,
        connector,
        registry,
        audit_rx,
    }
}

fn start_session(h: &Harness, target_id: i64) -> (TestClient, tokio::task::JoinHandle<()>) {
    let (sink, stream, client) = memory_transport(32);
    let bridge = h.bridge.clone();
    let task = tokio::spawn(async move { bridge.run_session(target_id, 1, sink, stream).await });
    (client, task)
}

async fn authenticate(client: &mut TestClient) {
    assert_eq!(client.recv().await.unwrap(), Envelope::Ready);
    client
        .send(Envelope::Auth {
            key: USER_KEY.into(),
        })
        .await;
}

async fn expect_output(client: &mut TestClient, expected: &[u8]) {
    match client.recv().await.unwrap() {
        Envelope::Output { data } => assert_eq!(decode_payload(&data).unwrap(), expected),
        other => panic!("expected output, got {other:?}"),
    }
}

#[tokio::test]
async fn first_connection_prompts_and_stores_fingerprint() {
    let mut h = harness(None);
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;

    match client.recv().await.unwrap() {
        Envelope::HostKeyVerify {
            status,
            fingerprint,
            stored_key,
        } => {
            assert_eq!(status, HostKeyStatus::New);
            assert_eq!(fingerprint, FINGERPRINT);
            assert_eq!(stored_key, None);
        }
        other => panic!("expected host key prompt, got {other:?}"),
    }
    client.send(Envelope::HostKeyConfirm { accept: true }).await;

    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::Connected {
            host_key: FINGERPRINT.into()
        }
    );

    client.send(Envelope::input(b"uname -a\n")).await;
    expect_output(&mut client, b"uname -a\n").await;
    assert_eq!(h.registry.len(), 1);

    client.hang_up();
    task.await.unwrap();

    use server_core::TargetStore;
    let record = h.store.fetch(7, 1).await.unwrap();
    assert_eq!(record.host_fingerprint.as_deref(), Some(FINGERPRINT));
    assert_eq!(h.registry.len(), 0);

    let connect = h.audit_rx.recv().await.unwrap();
    assert_eq!(connect.kind, AuditKind::SshConnect);
    let disconnect = h.audit_rx.recv().await.unwrap();
    assert_eq!(disconnect.kind, AuditKind::SshDisconnect);
    assert_eq!(disconnect.failure, None);
}

#[tokio::test]
async fn matching_fingerprint_skips_the_prompt() {
    let h = harness(Some(FINGERPRINT));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;

    // Straight to connected; no trust decision needed.
    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::Connected {
            host_key: FINGERPRINT.into()
        }
    );

    client.send(Envelope::input(b"pwd\n")).await;
    expect_output(&mut client, b"pwd\n").await;

    client.hang_up();
    task.await.unwrap();
}

#[tokio::test]
async fn rejected_mismatch_never_reaches_the_shell() {
    let h = harness(Some("SHA256:previous-key"));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;

    match client.recv().await.unwrap() {
        Envelope::HostKeyVerify {
            status, stored_key, ..
        } => {
            assert_eq!(status, HostKeyStatus::Mismatch);
            assert_eq!(stored_key.as_deref(), Some("SHA256:previous-key"));
        }
        other => panic!("expected host key prompt, got {other:?}"),
    }
    client.send(Envelope::HostKeyConfirm { accept: false }).await;

    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::error("Host key verification rejected")
    );
    assert_eq!(client.recv().await, None);
    task.await.unwrap();

    // Stored identity untouched, remote connection torn down.
    use server_core::TargetStore;
    let record = h.store.fetch(7, 1).await.unwrap();
    assert_eq!(record.host_fingerprint.as_deref(), Some("SHA256:previous-key"));
    assert!(h.connector.remote_closed.load(Ordering::SeqCst));
    assert_eq!(h.registry.len(), 0);
}

#[tokio::test]
async fn accepted_mismatch_replaces_the_stored_fingerprint() {
    let h = harness(Some("SHA256:previous-key"));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;
    match client.recv().await.unwrap() {
        Envelope::HostKeyVerify { status, .. } => assert_eq!(status, HostKeyStatus::Mismatch),
        other => panic!("expected host key prompt, got {other:?}"),
    }
    client.send(Envelope::HostKeyConfirm { accept: true }).await;
    assert!(matches!(client.recv().await.unwrap(), Envelope::Connected { .. }));

    client.hang_up();
    task.await.unwrap();

    use server_core::TargetStore;
    let record = h.store.fetch(7, 1).await.unwrap();
    assert_eq!(record.host_fingerprint.as_deref(), Some(FINGERPRINT));
}

#[tokio::test(start_paused = true)]
async fn auth_timeout_fails_before_any_connect_attempt() {
    let h = harness(None);
    let (mut client, task) = start_session(&h, 7);

    assert_eq!(client.recv().await.unwrap(), Envelope::Ready);
    // Say nothing; paused time fast-forwards through the auth window.
    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::error("Authentication timeout")
    );
    assert_eq!(client.recv().await, None);
    task.await.unwrap();

    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_closes_the_remote() {
    let h = harness(None);
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;
    assert!(matches!(
        client.recv().await.unwrap(),
        Envelope::HostKeyVerify { .. }
    ));
    // Never answer the prompt.
    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::error("Host key verification timeout")
    );
    task.await.unwrap();

    use server_core::TargetStore;
    let record = h.store.fetch(7, 1).await.unwrap();
    assert_eq!(record.host_fingerprint, None);
    assert!(h.connector.remote_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn wrong_user_key_is_rejected_without_connecting() {
    let h = harness(None);
    let (mut client, task) = start_session(&h, 7);

    assert_eq!(client.recv().await.unwrap(), Envelope::Ready);
    client
        .send(Envelope::Auth {
            key: "not-the-key".into(),
        })
        .await;

    assert_eq!(
        client.recv().await.unwrap(),
        Envelope::error("Invalid authentication key")
    );
    task.await.unwrap();
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn frames_invalid_for_the_state_end_the_session() {
    let h = harness(None);
    let (mut client, task) = start_session(&h, 7);

    assert_eq!(client.recv().await.unwrap(), Envelope::Ready);
    client.send(Envelope::input(b"ls\n")).await;

    match client.recv().await.unwrap() {
        Envelope::Error { error } => {
            assert!(error.starts_with("Protocol violation"), "{error}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    task.await.unwrap();
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn garbled_input_payload_is_a_protocol_violation() {
    let h = harness(Some(FINGERPRINT));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;
    assert!(matches!(client.recv().await.unwrap(), Envelope::Connected { .. }));

    client
        .send(Envelope::Input {
            data: "!!! not base64 !!!".into(),
        })
        .await;

    match client.recv().await.unwrap() {
        Envelope::Error { error } => assert!(error.starts_with("Protocol violation"), "{error}"),
        other => panic!("expected error, got {other:?}"),
    }
    task.await.unwrap();
}

#[tokio::test]
async fn ping_is_answered_during_relay() {
    let h = harness(Some(FINGERPRINT));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;
    assert!(matches!(client.recv().await.unwrap(), Envelope::Connected { .. }));

    client.send(Envelope::Ping).await;
    assert_eq!(client.recv().await.unwrap(), Envelope::Pong);

    client.hang_up();
    task.await.unwrap();
}

#[tokio::test]
async fn large_output_is_chunked() {
    let h = harness(Some(FINGERPRINT));
    let (mut client, task) = start_session(&h, 7);

    authenticate(&mut client).await;
    assert!(matches!(client.recv().await.unwrap(), Envelope::Connected { .. }));

    let big = vec![b'x'; 10_000];
    client
        .send(Envelope::Input {
            data: encode_payload(&big),
        })
        .await;

    let mut collected = Vec::new();
    while collected.len() < big.len() {
        match client.recv().await.unwrap() {
            Envelope::Output { data } => {
                let chunk = decode_payload(&data).unwrap();
                assert!(chunk.len() <= 4096, "chunk of {} bytes", chunk.len());
                collected.extend_from_slice(&chunk);
            }
            other => panic!("expected output, got {other:?}"),
        }
    }
    assert_eq!(collected, big);

    client.hang_up();
    task.await.unwrap();
}

#[tokio::test]
async fn concurrent_sessions_stay_independent() {
    let h = harness(Some(FINGERPRINT));
    let (mut a, task_a) = start_session(&h, 7);
    let (mut b, task_b) = start_session(&h, 8);

    authenticate(&mut a).await;
    authenticate(&mut b).await;
    assert!(matches!(a.recv().await.unwrap(), Envelope::Connected { .. }));
    assert!(matches!(b.recv().await.unwrap(), Envelope::Connected { .. }));

    a.send(Envelope::input(b"alpha\n")).await;
    b.send(Envelope::input(b"bravo\n")).await;
    expect_output(&mut a, b"alpha\n").await;
    expect_output(&mut b, b"bravo\n").await;

    // Closing one session leaves the other live.
    a.hang_up();
    task_a.await.unwrap();

    b.send(Envelope::input(b"still here\n")).await;
    expect_output(&mut b, b"still here\n").await;
    assert_eq!(h.registry.len(), 1);

    b.hang_up();
    task_b.await.unwrap();
    assert_eq!(h.registry.len(), 0);
}
