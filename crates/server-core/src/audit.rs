//! One-way audit publication.
//!
//! The bridge reports connect and disconnect events here and moves on: the
//! channel is unbounded, sends never block, and a missing or dead consumer
//! degrades to a debug log line rather than an error. Audit can observe a
//! session but never interfere with one.

use chrono::Utc;
use sg_types::{AuditEvent, AuditKind, TargetRecord};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl AuditSink {
    /// An audit sink paired with the receiver that consumes its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn connected(&self, target: &TargetRecord, owner_id: i64) {
        self.publish(AuditEvent {
            kind: AuditKind::SshConnect,
            target_id: target.id,
            owner_id,
            target_name: target.name.clone(),
            detail: format!("Connected to {}@{}:{}", target.username, target.host, target.port),
            failure: None,
            at: Utc::now(),
        });
    }

    pub fn disconnected(&self, target: &TargetRecord, owner_id: i64, failure: Option<String>) {
        self.publish(AuditEvent {
            kind: AuditKind::SshDisconnect,
            target_id: target.id,
            owner_id,
            target_name: target.name.clone(),
            detail: format!("Disconnected from {}@{}:{}", target.username, target.host, target.port),
            failure,
            at: Utc::now(),
        });
    }

    fn publish(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("audit consumer gone; event dropped");
        }
    }
}
