use serde::{Deserialize, Serialize};

use crate::credentials::EncryptedCredential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Password,
    Key,
}

/// A remote machine a user may open sessions to, as resolved by the
/// persistence layer for one `(target, owner)` pair.
///
/// The credential is present only in encrypted form; the stored host
/// fingerprint is `None` until the first confirmed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: i64,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth_type: AuthType,
    pub encrypted_credential: EncryptedCredential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,
}

fn default_port() -> u16 {
    22
}
