//! Chains, chain links and the chain store
//!
//! An instrument's chain is a gap-free sequence of [`ChainLink`]s, index 0
//! being the root whose name is the instrument name. The link array is
//! published copy-on-write through `ArcSwap`, so a reader resolves it once and
//! walks a consistent sequence while the feed thread grows or truncates it.

mod builder;
mod link;

pub use builder::{ChainBuilder, SnapshotPolicy, UpdateOutcome, UpdateReport};
pub use link::{Capture, ChainLink};

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::core::StreamId;

/// Ordered pages of one instrument
pub struct Chain {
    instrument: String,
    links: ArcSwap<Vec<Arc<ChainLink>>>,
}

impl Chain {
    /// Create a chain holding only its root link
    pub(crate) fn with_root(instrument: &str, root_stream: StreamId) -> Arc<Chain> {
        Arc::new_cyclic(|weak| {
            let root = ChainLink::new(0, instrument.to_string(), root_stream, weak.clone());
            Chain {
                instrument: instrument.to_string(),
                links: ArcSwap::from_pointee(vec![Arc::new(root)]),
            }
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Consistent view of the link array
    pub fn links(&self) -> Arc<Vec<Arc<ChainLink>>> {
        self.links.load_full()
    }

    pub fn len(&self) -> usize {
        self.links.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn link(&self, index: usize) -> Option<Arc<ChainLink>> {
        self.links.load().get(index).cloned()
    }

    pub fn root(&self) -> Option<Arc<ChainLink>> {
        self.link(0)
    }

    /// Token addressing canonical messages for this chain (the root's stream)
    pub fn token(&self) -> StreamId {
        self.links
            .load()
            .first()
            .map(|root| root.stream_id())
            .unwrap_or(StreamId(0))
    }

    /// Whether `link` is still attached at its index
    pub fn contains(&self, link: &ChainLink) -> bool {
        self.links
            .load()
            .get(link.index())
            .is_some_and(|l| std::ptr::eq(Arc::as_ptr(l), link))
    }

    /// Append a link at the end; `None` if `index` is not the next free slot
    pub(crate) fn push_link(
        self: &Arc<Self>,
        index: usize,
        name: &str,
        stream: StreamId,
    ) -> Option<Arc<ChainLink>> {
        let current = self.links.load_full();
        if current.len() != index {
            return None;
        }
        let link = Arc::new(ChainLink::new(
            index,
            name.to_string(),
            stream,
            Arc::downgrade(self),
        ));
        let mut next = Vec::with_capacity(index + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&link));
        self.links.store(Arc::new(next));
        Some(link)
    }

    /// Keep the first `len` links, returning how many were dropped
    pub(crate) fn truncate(&self, len: usize) -> usize {
        let current = self.links.load_full();
        if current.len() <= len {
            return 0;
        }
        let removed = current.len() - len;
        self.links.store(Arc::new(current[..len].to_vec()));
        removed
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("instrument", &self.instrument)
            .field("len", &self.len())
            .finish()
    }
}

/// Instrument name -> chain, fixed after startup
#[derive(Debug, Default)]
pub struct ChainStore {
    chains: BTreeMap<String, Arc<Chain>>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, chain: Arc<Chain>) {
        self.chains.insert(chain.instrument().to_string(), chain);
    }

    pub fn get(&self, instrument: &str) -> Option<&Arc<Chain>> {
        self.chains.get(instrument)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.chains.contains_key(instrument)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<Chain>> {
        self.chains.values()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Total links across every chain
    pub fn link_count(&self) -> usize {
        self.chains.values().map(|c| c.len()).sum()
    }
}
