//! Natural-key registry
//!
//! Maps natural keys (patient codes, encounter codes, procedure codes, and the
//! natural references of dimension rows) to internal identifiers. A key maps
//! to one id for the lifetime of the warehouse.

use crate::adapters::database::traits::{RegistryInsert, WarehouseTransaction};
use crate::domain::ids::{InternalId, KeyKind};
use crate::domain::{Result, WarehouseError};

/// Registry facade over the transactional store
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalKeyRegistry;

impl NaturalKeyRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Register `natural_key -> internal_id`
    ///
    /// Registering the same pair again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an `Integrity` error if the key is already mapped to a different id.
    pub async fn register(
        &self,
        tx: &mut dyn WarehouseTransaction,
        kind: KeyKind,
        natural_key: &str,
        internal_id: InternalId,
    ) -> Result<()> {
        match tx
            .registry_insert_if_absent(kind, natural_key, &internal_id)
            .await?
        {
            RegistryInsert::Inserted => Ok(()),
            RegistryInsert::Existing(existing) if existing == internal_id => Ok(()),
            RegistryInsert::Existing(existing) => Err(WarehouseError::Integrity(format!(
                "{kind} '{natural_key}' is registered to {existing}, refusing to remap to {internal_id}"
            ))),
        }
    }

    /// Look up a mapping
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered.
    pub async fn lookup(
        &self,
        tx: &mut dyn WarehouseTransaction,
        kind: KeyKind,
        natural_key: &str,
    ) -> Result<InternalId> {
        self.try_lookup(tx, kind, natural_key)
            .await?
            .ok_or_else(|| WarehouseError::NotFound(format!("{kind} '{natural_key}'")))
    }

    /// Look up a mapping, `None` when absent
    pub async fn try_lookup(
        &self,
        tx: &mut dyn WarehouseTransaction,
        kind: KeyKind,
        natural_key: &str,
    ) -> Result<Option<InternalId>> {
        tx.registry_get(kind, natural_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::traits::WarehouseStore;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::ids::{PatientId, SurrogateKey};

    #[tokio::test]
    async fn test_register_and_lookup() {
        let store = MemoryStore::new();
        let registry = NaturalKeyRegistry::new();
        let mut tx = store.begin().await.unwrap();
        let id = InternalId::from(PatientId::generate());

        registry
            .register(tx.as_mut(), KeyKind::Patient, "PAT000000", id)
            .await
            .unwrap();
        assert_eq!(
            registry.lookup(tx.as_mut(), KeyKind::Patient, "PAT000000").await.unwrap(),
            id
        );
    }

    #[tokio::test]
    async fn test_reregistering_same_id_is_noop() {
        let store = MemoryStore::new();
        let registry = NaturalKeyRegistry::new();
        let mut tx = store.begin().await.unwrap();
        let id = InternalId::from(SurrogateKey::new(7));

        registry.register(tx.as_mut(), KeyKind::DimFacility, "f", id).await.unwrap();
        registry.register(tx.as_mut(), KeyKind::DimFacility, "f", id).await.unwrap();
    }

    #[tokio::test]
    async fn test_remap_is_integrity_error() {
        let store = MemoryStore::new();
        let registry = NaturalKeyRegistry::new();
        let mut tx = store.begin().await.unwrap();

        registry
            .register(tx.as_mut(), KeyKind::Encounter, "ENC-1", InternalId::from(PatientId::generate()))
            .await
            .unwrap();
        let err = registry
            .register(tx.as_mut(), KeyKind::Encounter, "ENC-1", InternalId::from(PatientId::generate()))
            .await
            .unwrap_err();

        assert!(matches!(err, WarehouseError::Integrity(_)));
        assert!(!err.is_systemic());
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let store = MemoryStore::new();
        let registry = NaturalKeyRegistry::new();
        let mut tx = store.begin().await.unwrap();

        let err = registry.lookup(tx.as_mut(), KeyKind::Procedure, "nope").await.unwrap_err();
        assert!(matches!(err, WarehouseError::NotFound(_)));
        assert!(registry
            .try_lookup(tx.as_mut(), KeyKind::Procedure, "nope")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_separate_namespaces() {
        let store = MemoryStore::new();
        let registry = NaturalKeyRegistry::new();
        let mut tx = store.begin().await.unwrap();

        registry
            .register(tx.as_mut(), KeyKind::Patient, "X", InternalId::from(PatientId::generate()))
            .await
            .unwrap();
        assert!(registry.try_lookup(tx.as_mut(), KeyKind::Encounter, "X").await.unwrap().is_none());
    }
}
