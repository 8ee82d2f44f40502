//! In-process loopback transport
//!
//! Both sides are backed by unbounded crossbeam channels. The injector halves
//! ([`FeedInjector`], [`RequestInjector`]) play the role of the upstream
//! publisher and the downstream requester respectively.
//!
//! Injectors share state with the transport handles through an inner `Arc`, so
//! they never hold a reference to the handle the coordinator checks at teardown.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::{FeedEvent, FeedSource, FeedTransport, RequestSource, ServiceTransport};
use crate::codec::{BinaryCodec, FieldMap};
use crate::core::{
    ChannelId, ProtocolVersion, RegistrationError, ServiceId, StreamId, SubscriptionRequest,
    TransportError,
};

fn recv<T>(rx: &Receiver<T>, timeout: Duration) -> Result<Option<T>, TransportError> {
    match rx.recv_timeout(timeout) {
        Ok(item) => Ok(Some(item)),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
    }
}

// ---------------------------------------------------------------------------
// Feed side
// ---------------------------------------------------------------------------

struct FeedShared {
    service_id: ServiceId,
    protocol: ProtocolVersion,
    initialized: AtomicBool,
    fail_initialize: AtomicBool,
    next_stream: AtomicI32,
    subscriptions: Mutex<HashMap<String, StreamId>>,
    subscribed: Condvar,
    rejected: Mutex<HashSet<String>>,
    events: Sender<FeedEvent>,
}

/// Feed-side transport handle
pub struct LoopbackFeed {
    shared: Arc<FeedShared>,
}

/// Feed-side event source
pub struct LoopbackFeedSource {
    events: Receiver<FeedEvent>,
}

/// Upstream publisher half of the feed loopback
#[derive(Clone)]
pub struct FeedInjector {
    shared: Arc<FeedShared>,
    codec: BinaryCodec,
}

impl LoopbackFeed {
    pub fn new(service_id: ServiceId) -> (LoopbackFeed, LoopbackFeedSource, FeedInjector) {
        let (tx, rx) = channel::unbounded();
        let shared = Arc::new(FeedShared {
            service_id,
            protocol: ProtocolVersion::CURRENT,
            initialized: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
            next_stream: AtomicI32::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            subscribed: Condvar::new(),
            rejected: Mutex::new(HashSet::new()),
            events: tx,
        });
        (
            LoopbackFeed {
                shared: Arc::clone(&shared),
            },
            LoopbackFeedSource { events: rx },
            FeedInjector {
                shared,
                codec: BinaryCodec::new(),
            },
        )
    }
}

impl FeedTransport for LoopbackFeed {
    fn initialize(&self) -> Result<(), TransportError> {
        if self.shared.fail_initialize.load(Ordering::Acquire) {
            return Err(TransportError::Initialization(
                "feed loopback configured to fail".to_string(),
            ));
        }
        self.shared.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn subscribe(&self, item: &str) -> Result<StreamId, RegistrationError> {
        if !self.shared.initialized.load(Ordering::Acquire) {
            return Err(RegistrationError::new(item, "transport not initialized"));
        }
        if self.shared.rejected.lock().contains(item) {
            return Err(RegistrationError::new(item, "rejected by upstream"));
        }

        let mut subscriptions = self.shared.subscriptions.lock();
        if let Some(stream) = subscriptions.get(item) {
            return Ok(*stream);
        }
        let stream = StreamId(self.shared.next_stream.fetch_add(1, Ordering::Relaxed));
        subscriptions.insert(item.to_string(), stream);
        self.shared.subscribed.notify_all();
        debug!(item, stream = %stream, "loopback subscription opened");
        Ok(stream)
    }

    fn service_id(&self) -> ServiceId {
        self.shared.service_id
    }

    fn protocol(&self) -> ProtocolVersion {
        self.shared.protocol
    }
}

impl FeedSource for LoopbackFeedSource {
    fn poll(&mut self, timeout: Duration) -> Result<Option<FeedEvent>, TransportError> {
        recv(&self.events, timeout)
    }
}

impl FeedInjector {
    /// Make the next `initialize` call fail
    pub fn fail_initialize(&self) {
        self.shared.fail_initialize.store(true, Ordering::Release);
    }

    /// Make subscriptions for `item` fail
    pub fn reject(&self, item: &str) {
        self.shared.rejected.lock().insert(item.to_string());
    }

    pub fn stream_for(&self, item: &str) -> Option<StreamId> {
        self.shared.subscriptions.lock().get(item).copied()
    }

    /// Block until `item` has been subscribed or `timeout` elapses
    pub fn wait_for_subscription(&self, item: &str, timeout: Duration) -> Option<StreamId> {
        let deadline = Instant::now() + timeout;
        let mut subscriptions = self.shared.subscriptions.lock();
        loop {
            if let Some(stream) = subscriptions.get(item) {
                return Some(*stream);
            }
            if self
                .shared
                .subscribed
                .wait_until(&mut subscriptions, deadline)
                .timed_out()
            {
                return subscriptions.get(item).copied();
            }
        }
    }

    /// Sorted list of subscribed item names
    pub fn subscriptions(&self) -> Vec<String> {
        let mut items: Vec<String> = self.shared.subscriptions.lock().keys().cloned().collect();
        items.sort();
        items
    }

    /// Publish an update for a subscribed item
    ///
    /// Returns `Ok(false)` when nothing is subscribed under that name.
    pub fn publish(&self, item: &str, fields: &FieldMap) -> Result<bool, TransportError> {
        match self.stream_for(item) {
            Some(stream) => self.publish_to(stream, fields).map(|_| true),
            None => {
                trace!(item, "dropping update for unsubscribed item");
                Ok(false)
            }
        }
    }

    /// Publish an update on an explicit stream
    pub fn publish_to(&self, stream: StreamId, fields: &FieldMap) -> Result<(), TransportError> {
        let data = self
            .codec
            .encode_fields(self.shared.protocol, fields)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.publish_raw(stream, data)
    }

    /// Publish pre-encoded bytes on a stream
    pub fn publish_raw(&self, stream: StreamId, data: Bytes) -> Result<(), TransportError> {
        self.shared
            .events
            .send(FeedEvent::Update {
                stream,
                version: self.shared.protocol,
                data,
            })
            .map_err(|_| TransportError::Disconnected)
    }

    /// Report that the initial images have been delivered
    pub fn synced(&self) -> Result<(), TransportError> {
        self.shared
            .events
            .send(FeedEvent::Synced)
            .map_err(|_| TransportError::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// Service side
// ---------------------------------------------------------------------------

/// One reply observed by the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub channel: ChannelId,
    pub token: StreamId,
    pub data: Bytes,
    pub is_final: bool,
    /// Sent through `close`
    pub closed: bool,
}

/// Replies kept before the oldest are discarded
pub const REPLY_LOG_CAPACITY: usize = 4096;

struct ServiceShared {
    initialized: AtomicBool,
    fail_initialize: AtomicBool,
    replies: Mutex<VecDeque<Reply>>,
    replied: Condvar,
    dead_channels: Mutex<HashSet<ChannelId>>,
}

/// Service-side transport handle
pub struct LoopbackService {
    shared: Arc<ServiceShared>,
}

/// Service-side request source
pub struct LoopbackRequestSource {
    requests: Receiver<SubscriptionRequest>,
}

/// Downstream requester half of the service loopback
pub struct RequestInjector {
    shared: Arc<ServiceShared>,
    requests: Sender<SubscriptionRequest>,
    service_id: ServiceId,
    next_token: AtomicI32,
}

impl LoopbackService {
    pub fn new(service_id: ServiceId) -> (LoopbackService, LoopbackRequestSource, RequestInjector) {
        let (tx, rx) = channel::unbounded();
        let shared = Arc::new(ServiceShared {
            initialized: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
            replies: Mutex::new(VecDeque::new()),
            replied: Condvar::new(),
            dead_channels: Mutex::new(HashSet::new()),
        });
        (
            LoopbackService {
                shared: Arc::clone(&shared),
            },
            LoopbackRequestSource { requests: rx },
            RequestInjector {
                shared,
                requests: tx,
                service_id,
                next_token: AtomicI32::new(1),
            },
        )
    }

    fn record(&self, reply: Reply) -> Result<(), TransportError> {
        if !self.shared.initialized.load(Ordering::Acquire) {
            return Err(TransportError::Initialization(
                "service loopback not initialized".to_string(),
            ));
        }
        if self.shared.dead_channels.lock().contains(&reply.channel) {
            return Err(TransportError::ChannelClosed(reply.channel.0));
        }
        let mut replies = self.shared.replies.lock();
        if replies.len() == REPLY_LOG_CAPACITY {
            if let Some(oldest) = replies.pop_front() {
                warn!(
                    channel = %oldest.channel,
                    token = %oldest.token,
                    "reply log full, oldest reply discarded"
                );
            }
        }
        replies.push_back(reply);
        drop(replies);
        self.shared.replied.notify_all();
        Ok(())
    }
}

impl ServiceTransport for LoopbackService {
    fn initialize(&self) -> Result<(), TransportError> {
        if self.shared.fail_initialize.load(Ordering::Acquire) {
            return Err(TransportError::Initialization(
                "service loopback configured to fail".to_string(),
            ));
        }
        self.shared.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn send(
        &self,
        channel: ChannelId,
        token: StreamId,
        data: Bytes,
        is_final: bool,
    ) -> Result<(), TransportError> {
        self.record(Reply {
            channel,
            token,
            data,
            is_final,
            closed: false,
        })
    }

    fn close(
        &self,
        channel: ChannelId,
        token: StreamId,
        data: Bytes,
    ) -> Result<(), TransportError> {
        self.record(Reply {
            channel,
            token,
            data,
            is_final: true,
            closed: true,
        })
    }
}

impl RequestSource for LoopbackRequestSource {
    fn poll(&mut self, timeout: Duration) -> Result<Option<SubscriptionRequest>, TransportError> {
        recv(&self.requests, timeout)
    }
}

impl RequestInjector {
    /// Make the next `initialize` call fail
    pub fn fail_initialize(&self) {
        self.shared.fail_initialize.store(true, Ordering::Release);
    }

    /// Make every further send on `channel` fail
    pub fn disconnect_channel(&self, channel: ChannelId) {
        self.shared.dead_channels.lock().insert(channel);
    }

    /// Build a request for `item` with a fresh token
    pub fn request(&self, channel: ChannelId, item: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            channel,
            protocol: ProtocolVersion::CURRENT,
            token: StreamId(self.next_token.fetch_add(1, Ordering::Relaxed)),
            service_id: self.service_id,
            item_name: item.to_string(),
            use_attrib_info: false,
        }
    }

    pub fn submit(&self, request: SubscriptionRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Replies recorded so far for one stream, in send order
    pub fn replies_for(&self, channel: ChannelId, token: StreamId) -> Vec<Reply> {
        self.shared
            .replies
            .lock()
            .iter()
            .filter(|r| r.channel == channel && r.token == token)
            .cloned()
            .collect()
    }

    /// Every reply still in the log
    pub fn all_replies(&self) -> Vec<Reply> {
        self.shared.replies.lock().iter().cloned().collect()
    }

    /// Block until a final reply for the stream arrives, then take all of its replies
    ///
    /// The returned replies are removed from the log.
    pub fn wait_for_final(
        &self,
        channel: ChannelId,
        token: StreamId,
        timeout: Duration,
    ) -> Option<Vec<Reply>> {
        let deadline = Instant::now() + timeout;
        let mut replies = self.shared.replies.lock();
        loop {
            let done = replies
                .iter()
                .any(|r| r.channel == channel && r.token == token && r.is_final);
            if done {
                let mut taken = Vec::new();
                replies.retain(|r| {
                    if r.channel == channel && r.token == token {
                        taken.push(r.clone());
                        false
                    } else {
                        true
                    }
                });
                return Some(taken);
            }
            if self
                .shared
                .replied
                .wait_until(&mut replies, deadline)
                .timed_out()
            {
                return None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Both loopback sides, created together
pub struct LoopbackTransport {
    pub feed: LoopbackFeed,
    pub feed_source: LoopbackFeedSource,
    pub feed_injector: FeedInjector,
    pub service: LoopbackService,
    pub request_source: LoopbackRequestSource,
    pub request_injector: RequestInjector,
}

impl LoopbackTransport {
    pub fn new(service_id: ServiceId) -> Self {
        let (feed, feed_source, feed_injector) = LoopbackFeed::new(service_id);
        let (service, request_source, request_injector) = LoopbackService::new(service_id);
        Self {
            feed,
            feed_source,
            feed_injector,
            service,
            request_source,
            request_injector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_requires_initialize() {
        let (feed, _source, _injector) = LoopbackFeed::new(1);
        assert!(feed.subscribe("FOO").is_err());
        feed.initialize().unwrap();
        let stream = feed.subscribe("FOO").unwrap();
        assert_eq!(feed.subscribe("FOO").unwrap(), stream);
    }

    #[test]
    fn test_rejected_item() {
        let (feed, _source, injector) = LoopbackFeed::new(1);
        feed.initialize().unwrap();
        injector.reject("BAD");
        let err = feed.subscribe("BAD").unwrap_err();
        assert_eq!(err.item, "BAD");
    }

    #[test]
    fn test_publish_reaches_source() {
        let (feed, mut source, injector) = LoopbackFeed::new(1);
        feed.initialize().unwrap();
        let stream = feed.subscribe("FOO").unwrap();

        let mut fields = FieldMap::new();
        fields.push_str(240, "A");
        assert!(injector.publish("FOO", &fields).unwrap());
        assert!(!injector.publish("NOPE", &fields).unwrap());

        match source.poll(Duration::from_millis(100)).unwrap() {
            Some(FeedEvent::Update { stream: s, .. }) => assert_eq!(s, stream),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(source.poll(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_dead_channel_rejects_send() {
        let (service, _source, injector) = LoopbackService::new(1);
        service.initialize().unwrap();
        injector.disconnect_channel(ChannelId(4));
        let err = service
            .send(ChannelId(4), StreamId(1), Bytes::new(), true)
            .unwrap_err();
        assert_eq!(err, TransportError::ChannelClosed(4));
    }

    #[test]
    fn test_wait_for_final() {
        let (service, _source, injector) = LoopbackService::new(1);
        service.initialize().unwrap();
        service
            .send(ChannelId(1), StreamId(2), Bytes::from_static(b"a"), false)
            .unwrap();
        service
            .send(ChannelId(1), StreamId(2), Bytes::from_static(b"b"), true)
            .unwrap();
        let replies = injector
            .wait_for_final(ChannelId(1), StreamId(2), Duration::from_millis(100))
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert!(injector.replies_for(ChannelId(1), StreamId(2)).is_empty());
        assert!(injector
            .wait_for_final(ChannelId(1), StreamId(3), Duration::from_millis(10))
            .is_none());
    }

    #[test]
    fn test_wait_for_final_leaves_other_streams() {
        let (service, _source, injector) = LoopbackService::new(1);
        service.initialize().unwrap();
        service
            .send(ChannelId(1), StreamId(2), Bytes::from_static(b"a"), false)
            .unwrap();
        service
            .send(ChannelId(1), StreamId(3), Bytes::from_static(b"b"), true)
            .unwrap();
        let taken = injector
            .wait_for_final(ChannelId(1), StreamId(3), Duration::from_millis(100))
            .unwrap();
        assert_eq!(taken.len(), 1);
        let left = injector.all_replies();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].token, StreamId(2));
    }

    #[test]
    fn test_reply_log_is_bounded() {
        let (service, _source, injector) = LoopbackService::new(1);
        service.initialize().unwrap();
        for token in 0..(REPLY_LOG_CAPACITY + 10) {
            service
                .send(ChannelId(1), StreamId(token as i32), Bytes::new(), false)
                .unwrap();
        }
        let replies = injector.all_replies();
        assert_eq!(replies.len(), REPLY_LOG_CAPACITY);
        assert_eq!(replies[0].token, StreamId(10));
        assert!(injector.replies_for(ChannelId(1), StreamId(0)).is_empty());
    }
}
