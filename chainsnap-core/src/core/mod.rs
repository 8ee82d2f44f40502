//! Core types shared by every component
//!
//! This module provides the fundamental building blocks:
//! - Stream, channel and service identifiers (`StreamId`, `ChannelId`, `ServiceId`)
//! - Protocol versioning (`ProtocolVersion`)
//! - Response status vocabulary (`StreamState`, `StatusCode`)
//! - Designated field identifiers for chain pages (`fields`)
//! - The error taxonomy (`errors`)

pub mod errors;
pub mod types;

pub use errors::{
    CacheError, DecodeError, DecodeErrorKind, EncodeError, LifecycleError, RegistrationError,
    RequestError, StartupError, TransportError, UpdateError,
};
pub use types::{
    fields, ChannelId, FieldId, ProtocolVersion, ServiceId, StatusCode, StreamId, StreamState,
    SubscriptionRequest,
};
