use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryCache, SnapshotCache};
use crate::chain::{ChainBuilder, ChainStore, SnapshotPolicy, UpdateReport};
use crate::codec::{BinaryCodec, FieldMap, ResponseMessage, WireCodec};
use crate::config::Settings;
use crate::core::{fields, ChannelId, LifecycleError, ProtocolVersion, StreamId, UpdateError};
use crate::lifecycle::{Collaborators, LifecycleCoordinator};
use crate::monitoring::MetricsRegistry;
use crate::transport::{
    FeedInjector, FeedTransport, LoopbackFeed, LoopbackTransport, Reply, RequestInjector,
};

/// Page with short-range ids; `next = None` encodes a blank next link
pub fn page(next: Option<&str>, values: &[&str]) -> FieldMap {
    let mut map = FieldMap::with_capacity(values.len() + 1);
    for (slot, value) in values.iter().enumerate().take(fields::LINKS_PER_PAGE) {
        map.push_str(fields::LINK_FIRST + slot as u16, value);
    }
    match next {
        Some(name) => map.push_str(fields::NEXT_LINK, name),
        None => map.push_blank(fields::NEXT_LINK),
    }
    map
}

/// Page with long-range ids
pub fn long_page(next: Option<&str>, values: &[&str]) -> FieldMap {
    let mut map = FieldMap::with_capacity(values.len() + 1);
    for (slot, value) in values.iter().enumerate().take(fields::LINKS_PER_PAGE) {
        map.push_str(fields::LONG_LINK_FIRST + slot as u16, value);
    }
    match next {
        Some(name) => map.push_str(fields::LONG_NEXT_LINK, name),
        None => map.push_blank(fields::LONG_NEXT_LINK),
    }
    map
}

/// Add the default timestamp field; `None` adds it blank
pub fn with_timestamp(mut map: FieldMap, time: Option<&str>) -> FieldMap {
    match time {
        Some(t) => map.push_str(fields::DEFAULT_TIMESTAMP, t),
        None => map.push_blank(fields::DEFAULT_TIMESTAMP),
    }
    map
}

/// Decode every reply as a response message
pub fn decode_replies(replies: &[Reply]) -> Vec<ResponseMessage> {
    let codec = BinaryCodec::new();
    replies
        .iter()
        .filter_map(|r| codec.decode_response(&r.data, ProtocolVersion::CURRENT).ok())
        .collect()
}

/// Chain builder driven synchronously from a test
pub struct ChainFixture {
    pub builder: ChainBuilder,
    pub store: ChainStore,
    pub injector: FeedInjector,
    pub metrics: MetricsRegistry,
    pub cache: Arc<MemoryCache>,
}

impl ChainFixture {
    pub fn new(instruments: &[&str]) -> Self {
        Self::with_policy(instruments, SnapshotPolicy::Continuous, MemoryCache::new())
    }

    pub fn with_policy(instruments: &[&str], policy: SnapshotPolicy, cache: MemoryCache) -> Self {
        let (feed, _source, injector) = LoopbackFeed::new(1);
        feed.initialize().expect("loopback initialize");
        let metrics = MetricsRegistry::new().expect("metrics registry");
        let cache = Arc::new(cache);
        let mut builder = ChainBuilder::new(
            Arc::new(BinaryCodec::new()),
            Arc::clone(&cache) as Arc<dyn SnapshotCache>,
            Arc::new(feed),
            policy,
            metrics.clone(),
        );
        let mut store = ChainStore::new();
        for instrument in instruments {
            builder
                .create_root(&mut store, instrument)
                .expect("root registration");
        }
        Self {
            builder,
            store,
            injector,
            metrics,
            cache,
        }
    }

    pub fn stream(&self, item: &str) -> StreamId {
        self.injector
            .stream_for(item)
            .unwrap_or_else(|| panic!("{} is not subscribed", item))
    }

    /// Apply `fields` to the link subscribed under `item`
    pub fn update(&mut self, item: &str, fields: &FieldMap) -> Result<UpdateReport, UpdateError> {
        let stream = self.stream(item);
        self.builder
            .apply_update(stream, ProtocolVersion::CURRENT, fields)
    }

    /// Link names of an instrument's chain, in order
    pub fn names(&self, instrument: &str) -> Vec<String> {
        self.store
            .get(instrument)
            .map(|chain| {
                chain
                    .links()
                    .iter()
                    .map(|link| link.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Running coordinator over the loopback transport
pub struct ServiceHarness {
    pub coordinator: LifecycleCoordinator,
    pub feed: FeedInjector,
    pub requests: RequestInjector,
}

impl ServiceHarness {
    pub const TIMEOUT: Duration = Duration::from_secs(5);

    /// Coordinator with settings tuned for tests (short polls), not yet started
    pub fn new(settings: Settings) -> Self {
        let (collaborators, feed, requests) =
            Collaborators::loopback(LoopbackTransport::new(1), MemoryCache::new());
        let coordinator = LifecycleCoordinator::new(
            settings,
            collaborators,
            MetricsRegistry::new().expect("metrics registry"),
        );
        Self {
            coordinator,
            feed,
            requests,
        }
    }

    pub fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.feed.poll_interval_ms = 5;
        settings.service.poll_interval_ms = 5;
        settings
    }

    /// Initialize with `symbols` and start both contexts
    pub fn start(settings: Settings, symbols: &[&str]) -> Self {
        let mut harness = Self::new(settings);
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        harness
            .coordinator
            .initialize(&symbols)
            .expect("initialize");
        harness.coordinator.start().expect("start");
        harness
    }

    /// Publish `fields` for `item` once it is subscribed
    pub fn publish(&self, item: &str, fields: &FieldMap) {
        self.feed
            .wait_for_subscription(item, Self::TIMEOUT)
            .unwrap_or_else(|| panic!("{} never subscribed", item));
        self.feed.publish(item, fields).expect("publish");
    }

    /// Mark the feed synchronised and wait until requests are accepted
    pub fn sync(&self) {
        self.feed.synced().expect("synced");
        assert!(self.coordinator.wait_until_accepting(Self::TIMEOUT));
    }

    /// Request `item` on `channel` and return the decoded replies
    pub fn request(&self, channel: ChannelId, item: &str) -> Vec<ResponseMessage> {
        let request = self.requests.request(channel, item);
        let token = request.token;
        self.requests.submit(request).expect("submit");
        let replies = self
            .requests
            .wait_for_final(channel, token, Self::TIMEOUT)
            .unwrap_or_else(|| panic!("no final reply for {}", item));
        decode_replies(&replies)
    }

    /// Wait until `instrument` has `len` links, each with a snapshot
    pub fn wait_for_chain(&self, instrument: &str, len: usize) -> bool {
        let Some(store) = self.coordinator.store() else {
            return false;
        };
        let deadline = std::time::Instant::now() + Self::TIMEOUT;
        while std::time::Instant::now() < deadline {
            if let Some(chain) = store.get(instrument) {
                let links = chain.links();
                if links.len() == len && links.iter().all(|l| l.has_snapshot()) {
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    pub fn shutdown(mut self) -> Result<(), LifecycleError> {
        self.coordinator.shutdown()
    }
}
