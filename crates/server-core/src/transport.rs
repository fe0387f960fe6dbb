//! Transport abstraction between the bridge and the browser.
//!
//! The bridge speaks [`Envelope`]s; how those envelopes are framed (a
//! WebSocket in production, an in-memory channel pair in tests) is behind
//! these two traits. Framing errors are surfaced to the bridge rather than
//! swallowed, so a malformed frame ends the session instead of being
//! silently dropped.

use async_trait::async_trait;
use sg_types::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum TransportError {
    /// A frame arrived that does not decode into the wire protocol.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The peer is gone; no further frames can be sent or received.
    #[error("transport closed")]
    Closed,

    #[error("transport failure: {0}")]
    Failed(String),
}

/// Server-to-client half.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;
    /// Close the transport. Idempotent; errors are not interesting here.
    async fn close(&mut self);
}

/// Client-to-server half.
#[async_trait]
pub trait TransportStream: Send {
    /// The next inbound envelope. `Ok(None)` means the client closed the
    /// transport cleanly.
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError>;
}

/// In-memory transport for exercising the bridge without a socket.
///
/// Returns the server-side halves plus a [`TestClient`] that plays the
/// browser: what the client sends comes out of the server's stream, what
/// the server sends arrives at the client's receiver. Dropping the client
/// (or calling [`TestClient::hang_up`]) looks like a clean disconnect.
pub fn memory_transport(buffer: usize) -> (MemorySink, MemoryStream, TestClient) {
    let (to_server_tx, to_server_rx) = mpsc::channel(buffer);
    let (to_client_tx, to_client_rx) = mpsc::channel(buffer);
    (
        MemorySink {
            tx: Some(to_client_tx),
        },
        MemoryStream { rx: to_server_rx },
        TestClient {
            tx: Some(to_server_tx),
            rx: to_client_rx,
        },
    )
}

pub struct MemorySink {
    tx: Option<mpsc::Sender<Envelope>>,
}

pub struct MemoryStream {
    rx: mpsc::Receiver<Envelope>,
}

pub struct TestClient {
    tx: Option<mpsc::Sender<Envelope>>,
    rx: mpsc::Receiver<Envelope>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(envelope).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

impl TestClient {
    pub async fn send(&self, envelope: Envelope) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(envelope).await;
        }
    }

    /// Receive the next envelope from the server, `None` once the server
    /// side has closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Simulate the browser closing the connection.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}
