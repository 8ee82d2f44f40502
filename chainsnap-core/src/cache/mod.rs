//! Copy-on-write payload cache
//!
//! A cache entry is the mutable working image of one chain link. Every
//! application of a message produces a brand-new immutable [`PayloadImage`]
//! behind an `Arc`; handles issued earlier keep pointing at the image they
//! were issued for.

mod memory;

pub use memory::MemoryCache;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::codec::ResponseMessage;
use crate::core::CacheError;

/// Immutable image of one page as seen by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadImage {
    pub item_name: String,
    pub part_number: u32,
    pub complete: bool,
    entries: Vec<String>,
    /// Number of messages applied to the owning entry when this image was cut
    pub revision: u64,
}

impl PayloadImage {
    pub fn new(item_name: impl Into<String>, part_number: u32, entries: Vec<String>) -> Self {
        Self {
            item_name: item_name.into(),
            part_number,
            complete: false,
            entries,
            revision: 0,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reference-counted, read-only snapshot handle
pub type SnapshotHandle = Arc<PayloadImage>;

/// Mutable working entry owned by a chain link
///
/// Dropping the handle gives its slot back to the issuing cache.
#[derive(Debug)]
pub struct EntryHandle {
    id: u64,
    current: Option<SnapshotHandle>,
    slots: Arc<AtomicUsize>,
}

impl EntryHandle {
    /// Entry holding one already claimed slot of `slots`
    pub(crate) fn new(id: u64, slots: Arc<AtomicUsize>) -> Self {
        Self {
            id,
            current: None,
            slots,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Latest image, `None` before the first application
    pub fn current(&self) -> Option<&SnapshotHandle> {
        self.current.as_ref()
    }

    pub(crate) fn replace(&mut self, image: SnapshotHandle) {
        self.current = Some(image);
    }
}

impl Drop for EntryHandle {
    fn drop(&mut self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Payload cache collaborator
pub trait SnapshotCache: Send + Sync {
    /// Allocate a new working entry
    fn create(&self) -> Result<EntryHandle, CacheError>;

    /// Apply a decoded message to an entry and return the resulting image
    fn apply(
        &self,
        entry: &mut EntryHandle,
        message: &ResponseMessage,
    ) -> Result<SnapshotHandle, CacheError>;

    /// Number of entries whose handles are still alive
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
