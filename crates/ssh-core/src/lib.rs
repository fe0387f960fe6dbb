//! Outbound SSH connectivity for the session bridge.
//!
//! This crate owns everything between "we have a decrypted credential" and
//! "we have a live shell or file channel": dialing the target, the
//! password/public-key authentication cascade, synchronous host-key capture
//! during the handshake, and the channel plumbing that turns a russh
//! session into independent stdout/stderr byte streams or an SFTP handle.

pub mod connect;
pub mod error;
pub mod files;
pub mod keys;
pub mod shell;

pub use connect::{connect, ConnectSpec, RemoteConnection};
pub use error::{SshCoreError, SshResult};
pub use files::{FileSession, RemoteFile};
pub use shell::{shell_pipe, ShellBackend, ShellChannel, ShellInput};
