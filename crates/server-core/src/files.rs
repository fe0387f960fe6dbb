//! File-channel access to a target.
//!
//! File operations do not ride on an existing shell session: each request
//! authenticates and opens its own SFTP connection, which is torn down when
//! the request finishes. There is no interactive trust prompt on this path,
//! so a mismatched host key is refused outright; the user resolves it
//! through a terminal session first.

use std::sync::Arc;

use sg_types::TargetRecord;
use ssh_core::{ConnectSpec, FileSession};
use tracing::debug;

use crate::error::BridgeError;
use crate::store::TargetStore;
use crate::vault::Vault;

#[derive(Clone)]
pub struct FileAccess {
    pub store: Arc<dyn TargetStore>,
    pub vault: Arc<Vault>,
}

impl FileAccess {
    /// Authenticate against a target and open an SFTP session for one
    /// request. The caller closes the session when done.
    pub async fn open(
        &self,
        target_id: i64,
        owner_id: i64,
        user_key: &str,
    ) -> Result<FileSession, BridgeError> {
        let target = self.store.fetch(target_id, owner_id).await?;
        let credential = self
            .vault
            .decrypt_credential(user_key, &target.encrypted_credential)?;

        let spec = spec_for(&target);
        let (connection, observation) = ssh_core::connect(&spec, &credential, false).await?;
        drop(credential);

        debug!(target_id, host = %spec.address(), status = ?observation.status, "file channel opened");
        Ok(connection.into_files().await?)
    }
}

fn spec_for(target: &TargetRecord) -> ConnectSpec {
    ConnectSpec {
        host: target.host.clone(),
        port: target.port,
        username: target.username.clone(),
        known_fingerprint: target.host_fingerprint.clone(),
    }
}
