//! Thread-safe VM registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use vmforge_shared::{DomainError, VmforgeResult};

use crate::vm::{VmName, VmRecord, VmStatus};

/// Records of every VM this manager provisioned.
///
/// Shared between the manager and in-flight pipelines via `Arc`. Stored
/// snapshots never carry the guest secret.
#[derive(Clone, Debug, Default)]
pub struct VmRegistry {
    inner: Arc<RwLock<HashMap<VmName, VmRecord>>>,
}

impl VmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `record`'s name.
    ///
    /// The check and insert happen under one write lock, so of two
    /// concurrent requests for the same name exactly one wins. A name whose
    /// previous attempt failed can be claimed again.
    pub fn reserve(&self, record: &VmRecord) -> VmforgeResult<()> {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.get(record.name())
            && existing.status() != VmStatus::Failed
        {
            return Err(DomainError::AlreadyExists {
                domain: record.name().to_string(),
            }
            .into());
        }

        tracing::debug!(vm_name = %record.name(), user = %record.user(), "Reserving VM name");
        inner.insert(record.name().clone(), record.without_secret());
        Ok(())
    }

    /// Store the latest snapshot of a reserved record.
    pub fn update(&self, record: &VmRecord) {
        self.inner
            .write()
            .insert(record.name().clone(), record.without_secret());
    }

    pub fn get(&self, name: &str) -> Option<VmRecord> {
        let key = VmName::parse(name).ok()?;
        self.inner.read().get(&key).cloned()
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<VmRecord> {
        let mut records: Vec<VmRecord> = self.inner.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Secret;
    use crate::runtime::options::ResourceLimits;
    use crate::vm::VmRequest;

    fn record(name: &str) -> VmRecord {
        let spec = VmRequest::new(name, "user1", 2, 2048, 20)
            .validate(&ResourceLimits::default())
            .unwrap();
        VmRecord::new(&spec, "ubuntu")
    }

    #[test]
    fn test_duplicate_reservation_rejected() {
        let registry = VmRegistry::new();
        registry.reserve(&record("vm-001")).unwrap();

        let err = registry.reserve(&record("vm-001")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_name_can_be_reclaimed() {
        let registry = VmRegistry::new();
        let mut rec = record("vm-001");
        registry.reserve(&rec).unwrap();
        rec.transition_to(VmStatus::Failed).unwrap();
        registry.update(&rec);

        registry.reserve(&record("vm-001")).unwrap();
        assert_eq!(registry.get("vm-001").unwrap().status(), VmStatus::Creating);
    }

    #[test]
    fn test_stored_snapshot_has_no_secret() {
        let registry = VmRegistry::new();
        let mut rec = record("vm-001");
        registry.reserve(&rec).unwrap();
        rec.set_secret(Secret::new("0123456789abcdef")).unwrap();
        registry.update(&rec);

        assert!(registry.get("vm-001").unwrap().secret().is_none());
    }

    #[test]
    fn test_concurrent_reserve_single_winner() {
        let registry = VmRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.reserve(&record("vm-race")).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_list_and_get() {
        let registry = VmRegistry::new();
        registry.reserve(&record("vm-a")).unwrap();
        registry.reserve(&record("vm-b")).unwrap();
        assert_eq!(registry.list().len(), 2);

        assert!(registry.get("vm-a").is_some());
        assert!(registry.get("vm-c").is_none());
        assert!(registry.get("not a name").is_none());
    }
}
