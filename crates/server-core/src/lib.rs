//! Server-side core of the spyglass session bridge.
//!
//! Ties the credential vault, target store, host-identity handling, and
//! the per-session state machine together behind transport- and
//! connector-agnostic seams. The web layer supplies a transport (a
//! WebSocket) and this crate runs the session; tests supply in-memory
//! doubles and exercise the same code paths.

pub mod audit;
pub mod bridge;
pub mod config;
pub mod connector;
pub mod error;
pub mod files;
pub mod registry;
pub mod store;
pub mod transport;
pub mod vault;

pub use audit::AuditSink;
pub use bridge::Bridge;
pub use config::{ConfigError, ServerConfig};
pub use connector::{Connector, RemoteHandle, SshConnector};
pub use error::BridgeError;
pub use files::FileAccess;
pub use registry::{SessionInfo, SessionRegistry};
pub use store::{MemoryTargetStore, StoreError, TargetStore};
pub use transport::{memory_transport, TransportError, TransportSink, TransportStream};
pub use vault::{Vault, VaultError};
