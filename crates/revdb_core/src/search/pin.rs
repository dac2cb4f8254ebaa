//! Registry of open read snapshots.

use crate::branch::SegmentView;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Views of every open searcher, consulted by purge.
#[derive(Debug, Default)]
pub struct PinRegistry {
    next: AtomicU64,
    pins: Mutex<BTreeMap<u64, SegmentView>>,
}

impl PinRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `view` until the returned pin is dropped.
    pub fn pin(self: &Arc<Self>, view: SegmentView) -> SnapshotPin {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.pins.lock().insert(id, view);
        SnapshotPin {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Views currently pinned.
    pub fn views(&self) -> Vec<SegmentView> {
        self.pins.lock().values().cloned().collect()
    }

    /// Number of open pins.
    pub fn len(&self) -> usize {
        self.pins.lock().len()
    }

    /// True when no snapshot is pinned.
    pub fn is_empty(&self) -> bool {
        self.pins.lock().is_empty()
    }
}

/// Keeps a view registered while alive.
#[derive(Debug)]
pub struct SnapshotPin {
    registry: Arc<PinRegistry>,
    id: u64,
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.registry.pins.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_unregister_on_drop() {
        let registry = PinRegistry::new();
        let a = registry.pin(SegmentView::new());
        let b = registry.pin(SegmentView::new());
        assert_eq!(registry.len(), 2);
        drop(a);
        assert_eq!(registry.views().len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }
}
