use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::Chain;
use crate::cache::{EntryHandle, PayloadImage, SnapshotHandle};
use crate::core::StreamId;

/// Result of offering a link to the trigger scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// The live entry's current image became the snapshot
    Captured,
    /// A snapshot was already published; nothing changed
    AlreadyCaptured,
    /// No live entry (or no image in it) yet
    Empty,
}

/// One page of an instrument's chain
///
/// The snapshot cell is written only by the feed thread and read lock-free by
/// the service thread. Once set it is never cleared.
pub struct ChainLink {
    index: usize,
    name: String,
    stream_id: StreamId,
    chain: Weak<Chain>,
    snapshot: ArcSwapOption<PayloadImage>,
    live_entry: Mutex<Option<EntryHandle>>,
}

impl ChainLink {
    pub(crate) fn new(index: usize, name: String, stream_id: StreamId, chain: Weak<Chain>) -> Self {
        Self {
            index,
            name,
            stream_id,
            chain,
            snapshot: ArcSwapOption::empty(),
            live_entry: Mutex::new(None),
        }
    }

    /// Position in the chain, also the response part number
    pub fn index(&self) -> usize {
        self.index
    }

    /// Upstream subscription name of this page
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Owning chain, `None` once the store has been dropped
    pub fn chain(&self) -> Option<Arc<Chain>> {
        self.chain.upgrade()
    }

    /// Currently published snapshot
    pub fn snapshot(&self) -> Option<SnapshotHandle> {
        self.snapshot.load_full()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.load().is_some()
    }

    pub fn has_live_entry(&self) -> bool {
        self.live_entry.lock().is_some()
    }

    /// Replace the snapshot with a newer image
    pub(crate) fn publish(&self, handle: SnapshotHandle) {
        self.snapshot.store(Some(handle));
    }

    /// Publish the live entry's image if no snapshot exists yet
    pub(crate) fn capture(&self) -> Capture {
        if self.has_snapshot() {
            return Capture::AlreadyCaptured;
        }
        let image = match self.live_entry.lock().as_ref().and_then(|e| e.current().cloned()) {
            Some(image) => image,
            None => return Capture::Empty,
        };
        let previous = self
            .snapshot
            .compare_and_swap(&None::<SnapshotHandle>, Some(image));
        if previous.is_none() {
            Capture::Captured
        } else {
            Capture::AlreadyCaptured
        }
    }

    /// Run `f` against the live entry slot
    pub(crate) fn with_live_entry<R>(&self, f: impl FnOnce(&mut Option<EntryHandle>) -> R) -> R {
        f(&mut self.live_entry.lock())
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("stream_id", &self.stream_id)
            .field("has_snapshot", &self.has_snapshot())
            .finish()
    }
}
