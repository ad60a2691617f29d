//! Operator-applied status overrides, keyed by instance id.

use std::sync::Arc;

use dashmap::DashMap;

use roster_core::{InstanceId, InstanceStatus};

/// Shared handle to the override map.
///
/// Cloning shares the same map. Rules only read it; the registry is the
/// only writer.
#[derive(Debug, Clone, Default)]
pub struct StatusOverrides {
    inner: Arc<DashMap<InstanceId, InstanceStatus>>,
}

impl StatusOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceStatus> {
        self.inner.get(instance_id).map(|s| *s)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn insert(&self, instance_id: &str, status: InstanceStatus) -> Option<InstanceStatus> {
        self.inner.insert(instance_id.to_string(), status)
    }

    /// Insert only when no override is present. Returns whether it inserted.
    pub(crate) fn insert_if_absent(&self, instance_id: &str, status: InstanceStatus) -> bool {
        let mut inserted = false;
        self.inner.entry(instance_id.to_string()).or_insert_with(|| {
            inserted = true;
            status
        });
        inserted
    }

    pub(crate) fn remove(&self, instance_id: &str) -> Option<InstanceStatus> {
        self.inner.remove(instance_id).map(|(_, s)| s)
    }
}
