//! Mutation hooks
//!
//! The writer calls every registered hook after each operational insert or
//! update, inside the same transaction. The audit trail is one such hook.

use crate::adapters::database::traits::WarehouseTransaction;
use crate::domain::audit::{AuditEntry, MutationKind};
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One row mutation as seen by hooks
#[derive(Debug, Clone)]
pub struct Mutation {
    pub run_id: Uuid,
    pub table_name: &'static str,
    pub row_id: String,
    pub kind: MutationKind,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

/// Callback invoked after each operational mutation
///
/// An error returned by a hook fails the mutation's unit of work.
#[async_trait]
pub trait MutationHook: Send + Sync {
    async fn after_mutation(
        &self,
        tx: &mut dyn WarehouseTransaction,
        mutation: &Mutation,
    ) -> Result<()>;
}

/// Writes one `audit.row_change_log` entry per mutation
#[derive(Debug, Clone)]
pub struct AuditTrailHook {
    actor: String,
}

impl AuditTrailHook {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[async_trait]
impl MutationHook for AuditTrailHook {
    async fn after_mutation(
        &self,
        tx: &mut dyn WarehouseTransaction,
        mutation: &Mutation,
    ) -> Result<()> {
        let entry = AuditEntry {
            run_id: mutation.run_id,
            table_name: mutation.table_name.to_string(),
            row_id: mutation.row_id.clone(),
            operation: mutation.kind,
            before: mutation.before.clone(),
            after: mutation.after.clone(),
            actor: self.actor.clone(),
            changed_at: mutation.at,
        };
        tx.write_audit_entry(&entry).await
    }
}
