//! Shared types for the spyglass session bridge: the browser wire protocol,
//! target records, credentials, host-key classification, and audit events.

pub mod audit;
pub mod credentials;
pub mod files;
pub mod hostkey;
pub mod messages;
pub mod target;

pub use audit::{AuditEvent, AuditKind};
pub use credentials::{Credential, EncryptedCredential};
pub use files::RemoteFileInfo;
pub use hostkey::{HostKeyObservation, HostKeyStatus};
pub use messages::Envelope;
pub use target::{AuthType, TargetRecord};
