use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{EntryHandle, PayloadImage, SnapshotCache, SnapshotHandle};
use crate::codec::{MessageClass, ResponseMessage};
use crate::core::CacheError;

/// In-memory [`SnapshotCache`]
///
/// Live entries are bounded by `capacity`; a slot is freed when its
/// [`EntryHandle`] is dropped. Only refresh messages can be applied;
/// a status message against a payload entry is rejected.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    next_id: AtomicU64,
    entries: Arc<AtomicUsize>,
}

impl MemoryCache {
    pub const DEFAULT_CAPACITY: usize = 65_536;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            entries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache for MemoryCache {
    fn create(&self) -> Result<EntryHandle, CacheError> {
        let claimed = self
            .entries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            });
        if claimed.is_err() {
            return Err(CacheError::new(
                CacheError::CAPACITY_EXCEEDED,
                format!("cache capacity of {} entries reached", self.capacity),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(entry = id, "cache entry created");
        Ok(EntryHandle::new(id, Arc::clone(&self.entries)))
    }

    fn apply(
        &self,
        entry: &mut EntryHandle,
        message: &ResponseMessage,
    ) -> Result<SnapshotHandle, CacheError> {
        if message.class != MessageClass::Refresh {
            return Err(CacheError::new(
                CacheError::INVALID_MESSAGE,
                "only refresh messages can be cached",
            ));
        }

        let revision = entry.current().map_or(0, |image| image.revision) + 1;
        let image = Arc::new(PayloadImage {
            item_name: message.item_name.clone().unwrap_or_default(),
            part_number: message.part_number,
            complete: message.complete,
            entries: message.entries.clone(),
            revision,
        });
        entry.replace(Arc::clone(&image));
        trace!(entry = entry.id(), revision, "cache entry updated");
        Ok(image)
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }
}
