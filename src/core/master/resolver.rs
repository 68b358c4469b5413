//! Master data resolution
//!
//! Get-or-create for reference entities. Creation goes through the store's
//! atomic insert-if-absent followed by a re-select, so two chunks resolving
//! the same unseen code concurrently end up with one row.

use crate::adapters::database::traits::WarehouseTransaction;
use crate::core::master::catalog::{language_code, language_display, ENGLISH_CODE};
use crate::domain::ids::ReferenceId;
use crate::domain::reference::{DisplayFields, EntityType};
use crate::domain::{Result, WarehouseError};
use chrono::Utc;

/// Resolver for reference entities
///
/// Holds no cache: a chunk that rolls back may have created rows that no
/// longer exist, so every lookup goes to the transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct MasterDataResolver;

impl MasterDataResolver {
    pub fn new() -> Self {
        Self
    }

    /// Return the id of the reference with `natural_code`, creating it if absent
    ///
    /// An existing row keeps its display fields (first write wins).
    ///
    /// # Errors
    ///
    /// * `Resolution` if the code is empty
    /// * `DuplicateCodeRace` if the insert lost a race and the winner cannot be re-selected
    pub async fn resolve_or_create(
        &self,
        tx: &mut dyn WarehouseTransaction,
        entity: EntityType,
        natural_code: &str,
        display: &DisplayFields,
    ) -> Result<ReferenceId> {
        let code = natural_code.trim();
        if code.is_empty() {
            return Err(WarehouseError::Resolution(format!(
                "{entity} code cannot be empty"
            )));
        }

        if let Some(existing) = tx.find_reference(entity, code).await? {
            return Ok(existing.id);
        }

        let candidate = ReferenceId::generate();
        if tx
            .insert_reference_if_absent(entity, code, display, &candidate, Utc::now())
            .await?
        {
            tracing::debug!(entity = %entity, code = %code, id = %candidate, "Created reference entity");
            return Ok(candidate);
        }

        match tx.find_reference(entity, code).await? {
            Some(winner) => Ok(winner.id),
            None => Err(WarehouseError::DuplicateCodeRace {
                entity: entity.to_string(),
                code: code.to_string(),
            }),
        }
    }

    /// Resolve a language code, falling back to `default` when none is given
    ///
    /// # Errors
    ///
    /// Propagates errors from [`resolve_or_create`](Self::resolve_or_create).
    pub async fn resolve_language(
        &self,
        tx: &mut dyn WarehouseTransaction,
        code: Option<&str>,
        default: ReferenceId,
    ) -> Result<ReferenceId> {
        match code.map(language_code) {
            Some(code) if !code.is_empty() => {
                let display = language_display(&code);
                self.resolve_or_create(tx, EntityType::Language, &code, &display)
                    .await
            }
            _ => Ok(default),
        }
    }

    /// Resolve (creating if needed) the canonical English language row
    pub async fn resolve_english(&self, tx: &mut dyn WarehouseTransaction) -> Result<ReferenceId> {
        self.resolve_or_create(
            tx,
            EntityType::Language,
            ENGLISH_CODE,
            &language_display(ENGLISH_CODE),
        )
        .await
    }
}
