//! Chainsnap Core - Chained Reference-Data Snapshot Republisher
//!
//! Chainsnap subscribes to an upstream feed for a configured set of instruments,
//! rebuilds each instrument's *chain* (a singly linked sequence of pages, each page
//! naming the next one), captures a point-in-time snapshot of every page once per
//! trading cycle, and serves those snapshots to downstream requesters as a
//! multi-part response.
//!
//! ## Architecture
//!
//! ```text
//!   upstream feed ──► FeedSource ──► feed thread ─────────────────────┐
//!                                     │  WireCodec::decode_fields     │
//!                                     │  TriggerEvaluator::observe    │
//!                                     │  ChainBuilder::apply_update   │
//!                                     │  TriggerEvaluator::poll(scan) │
//!                                     ▼                               │
//!                               ChainStore (Arc) ◄── snapshots ──────┘
//!                                     │   ArcSwap link arrays
//!                                     │   ArcSwapOption snapshots
//!                                     ▼
//!   downstream ──► RequestSource ──► service thread
//!                                     │  ResponseCoordinator::on_request
//!                                     ▼
//!                               ServiceTransport (one part per link)
//! ```
//!
//! ## Core Modules
//! - `core`: identifiers, field ids, error taxonomy
//! - `codec`: wire codec trait and the binary field-list / map codec
//! - `cache`: copy-on-write payload cache
//! - `transport`: feed/service transport traits and the loopback transport
//! - `chain`: chain links, chain store, chain builder
//! - `trigger`: snapshot window and capture scan
//! - `response`: multi-part response assembly
//! - `lifecycle`: execution contexts, startup and shutdown sequencing

pub mod core;

pub mod cache;
pub mod chain;
pub mod codec;
pub mod config;
pub mod lifecycle;
pub mod monitoring;
pub mod resilience;
pub mod response;
pub mod testing;
pub mod transport;
pub mod trigger;
pub mod utils;

pub use crate::core::{
    fields, ChannelId, FieldId, ProtocolVersion, ServiceId, StatusCode, StreamId, StreamState,
    SubscriptionRequest,
};
pub use cache::{MemoryCache, PayloadImage, SnapshotCache, SnapshotHandle};
pub use chain::{Chain, ChainBuilder, ChainLink, ChainStore, SnapshotPolicy, UpdateOutcome};
pub use codec::{BinaryCodec, FieldLookup, FieldMap, WireCodec};
pub use lifecycle::{Collaborators, LifecycleCoordinator, LifecycleState};
pub use resilience::StopToken;
pub use response::{RequestOutcome, ResponseCoordinator};
pub use trigger::{ScanReport, TriggerEvaluator, TriggerPolicy, TriggerSignal};

pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::{MemoryCache, SnapshotCache};
    pub use crate::chain::{ChainBuilder, ChainStore, SnapshotPolicy};
    pub use crate::codec::{BinaryCodec, FieldMap, WireCodec};
    pub use crate::core::{ProtocolVersion, StreamId, SubscriptionRequest};
    pub use crate::lifecycle::{Collaborators, LifecycleCoordinator};
    pub use crate::resilience::StopToken;
    pub use crate::trigger::{TriggerEvaluator, TriggerPolicy};
    pub use crate::{Error, Result};
}
