//! Manager-level metrics (aggregate across all VMs).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for manager-wide metrics.
///
/// All counters are monotonic (never decrease).
#[derive(Clone, Debug, Default)]
pub struct RuntimeMetricsStorage {
    /// VMs that reached `running`
    pub(crate) vms_created: Arc<AtomicU64>,
    /// Provisioning passes that ended in `failed` or were cancelled
    pub(crate) vms_failed: Arc<AtomicU64>,
    /// Isolation networks this manager defined (not merely reused)
    pub(crate) networks_defined: Arc<AtomicU64>,
    /// Running VMs returned without an address
    pub(crate) addresses_pending: Arc<AtomicU64>,
}

impl RuntimeMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cloneable read handle over [`RuntimeMetricsStorage`].
#[derive(Clone, Debug)]
pub struct RuntimeMetrics {
    storage: RuntimeMetricsStorage,
}

impl RuntimeMetrics {
    pub(crate) fn new(storage: RuntimeMetricsStorage) -> Self {
        Self { storage }
    }

    /// Total VMs provisioned to `running` since manager startup.
    pub fn vms_created_total(&self) -> u64 {
        self.storage.vms_created.load(Ordering::Relaxed)
    }

    /// Total provisioning passes that did not produce a running VM.
    pub fn vms_failed_total(&self) -> u64 {
        self.storage.vms_failed.load(Ordering::Relaxed)
    }

    /// Total isolation networks defined by this manager.
    pub fn networks_defined_total(&self) -> u64 {
        self.storage.networks_defined.load(Ordering::Relaxed)
    }

    /// Total running VMs whose address was still pending when returned.
    pub fn addresses_pending_total(&self) -> u64 {
        self.storage.addresses_pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reads_shared_storage() {
        let storage = RuntimeMetricsStorage::new();
        let metrics = RuntimeMetrics::new(storage.clone());

        RuntimeMetricsStorage::inc(&storage.vms_created);
        RuntimeMetricsStorage::inc(&storage.vms_created);
        RuntimeMetricsStorage::inc(&storage.networks_defined);

        assert_eq!(metrics.vms_created_total(), 2);
        assert_eq!(metrics.networks_defined_total(), 1);
        assert_eq!(metrics.vms_failed_total(), 0);
        assert_eq!(metrics.addresses_pending_total(), 0);
    }
}
