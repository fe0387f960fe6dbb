//! Connector seam between the bridge and real SSH.
//!
//! The bridge only needs "connect, then give me a shell"; putting that
//! behind a trait lets the scenario tests drive full sessions against a
//! scripted remote instead of a live sshd.

use async_trait::async_trait;
use sg_types::{Credential, HostKeyObservation};
use ssh_core::{ConnectSpec, RemoteConnection, ShellChannel, SshCoreError};

/// Establishes authenticated connections to remote hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate. The host-key observation is always
    /// returned on success; with `allow_mismatch` set, a mismatched key
    /// still connects and the caller decides what to do with it.
    async fn connect(
        &self,
        spec: &ConnectSpec,
        credential: &Credential,
        allow_mismatch: bool,
    ) -> Result<(Box<dyn RemoteHandle>, HostKeyObservation), SshCoreError>;
}

/// A live, authenticated remote connection.
#[async_trait]
pub trait RemoteHandle: Send + Sync {
    async fn open_shell(&self, rows: u16, cols: u16) -> Result<ShellChannel, SshCoreError>;
    async fn close(&self);
}

/// The production connector; dials real hosts over SSH.
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        spec: &ConnectSpec,
        credential: &Credential,
        allow_mismatch: bool,
    ) -> Result<(Box<dyn RemoteHandle>, HostKeyObservation), SshCoreError> {
        let (connection, observation) = ssh_core::connect(spec, credential, allow_mismatch).await?;
        Ok((Box::new(connection), observation))
    }
}

#[async_trait]
impl RemoteHandle for RemoteConnection {
    async fn open_shell(&self, rows: u16, cols: u16) -> Result<ShellChannel, SshCoreError> {
        RemoteConnection::open_shell(self, rows, cols).await
    }

    async fn close(&self) {
        RemoteConnection::close(self).await;
    }
}
