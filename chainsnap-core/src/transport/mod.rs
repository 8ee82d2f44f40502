//! Transport boundary
//!
//! Two sides, each split into a shared handle and an owned event source:
//!
//! - Feed (upstream consumer): [`FeedTransport`] subscribes items, [`FeedSource`]
//!   yields [`FeedEvent`]s to the feed thread.
//! - Service (downstream provider): [`ServiceTransport`] sends replies,
//!   [`RequestSource`] yields [`SubscriptionRequest`]s to the service thread.
//!
//! The shared handles live behind `Arc` in the lifecycle coordinator and must be
//! exclusively owned again at teardown.

pub mod loopback;

pub use loopback::{
    FeedInjector, LoopbackFeed, LoopbackFeedSource, LoopbackRequestSource, LoopbackService,
    LoopbackTransport, Reply, RequestInjector, REPLY_LOG_CAPACITY,
};

use std::time::Duration;

use bytes::Bytes;

use crate::core::{
    ChannelId, ProtocolVersion, RegistrationError, ServiceId, StreamId, SubscriptionRequest,
    TransportError,
};

/// Event delivered by the upstream feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Field-list update for a subscribed stream
    Update {
        stream: StreamId,
        version: ProtocolVersion,
        data: Bytes,
    },
    /// Upstream has delivered the initial image of every subscription
    Synced,
}

/// Upstream subscription handle
pub trait FeedTransport: Send + Sync {
    fn initialize(&self) -> Result<(), TransportError>;

    /// Open a stream for an item
    fn subscribe(&self, item: &str) -> Result<StreamId, RegistrationError>;

    fn service_id(&self) -> ServiceId;

    fn protocol(&self) -> ProtocolVersion;
}

/// Upstream event source, owned by the feed thread
pub trait FeedSource: Send {
    /// Wait up to `timeout` for the next event
    fn poll(&mut self, timeout: Duration) -> Result<Option<FeedEvent>, TransportError>;
}

/// Downstream reply handle
pub trait ServiceTransport: Send + Sync {
    fn initialize(&self) -> Result<(), TransportError>;

    /// Send one response part
    fn send(
        &self,
        channel: ChannelId,
        token: StreamId,
        data: Bytes,
        is_final: bool,
    ) -> Result<(), TransportError>;

    /// Send a terminal status response and close the stream
    fn close(&self, channel: ChannelId, token: StreamId, data: Bytes)
        -> Result<(), TransportError>;
}

/// Downstream request source, owned by the service thread
pub trait RequestSource: Send {
    fn poll(&mut self, timeout: Duration) -> Result<Option<SubscriptionRequest>, TransportError>;
}
