//! Identifiers and wire vocabulary
//!
//! All identifiers are small `Copy` newtypes so they can be passed through the
//! feed and service loops without allocation.

use std::fmt;

/// Field identifier inside a field-list message
pub type FieldId = u16;

/// Service identifier echoed on every response
pub type ServiceId = u16;

/// Designated field identifiers for chain pages
///
/// Each page carries up to 14 payload values and a pointer to the next page.
/// Both come in a "short" and a "long" encoding; the two ranges map onto the
/// same logical slots.
pub mod fields {
    use super::FieldId;

    /// Next page name, short encoding
    pub const NEXT_LINK: FieldId = 238;
    /// Next page name, long encoding
    pub const LONG_NEXT_LINK: FieldId = 815;

    /// First payload slot, short encoding
    pub const LINK_FIRST: FieldId = 240;
    /// Last payload slot, short encoding
    pub const LINK_LAST: FieldId = 253;

    /// First payload slot, long encoding
    pub const LONG_LINK_FIRST: FieldId = 800;
    /// Last payload slot, long encoding
    pub const LONG_LINK_LAST: FieldId = 813;

    /// Number of payload slots per page
    pub const LINKS_PER_PAGE: usize = (LINK_LAST - LINK_FIRST + 1) as usize;

    /// Default field carrying the exchange time of the last activity
    pub const DEFAULT_TIMESTAMP: FieldId = 5;

    /// Upper bound on payload values per update (both encodings)
    pub const MAX_PAYLOAD_VALUES: usize = 2 * LINKS_PER_PAGE;

    /// Whether a field id carries a payload value, in either encoding
    #[inline]
    pub fn is_payload(id: FieldId) -> bool {
        matches!(id, LINK_FIRST..=LINK_LAST | LONG_LINK_FIRST..=LONG_LINK_LAST)
    }

    /// Whether a field id carries the next page pointer
    #[inline]
    pub fn is_next_link(id: FieldId) -> bool {
        id == NEXT_LINK || id == LONG_NEXT_LINK
    }
}

/// Stream token
///
/// Upstream: assigned by the feed transport on subscription.
/// Downstream: chosen by the requester and echoed on every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub i32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Downstream channel a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire protocol version (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    /// Version spoken by the bundled codec
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 14, minor: 1 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Packed form used on requests (`major * 256 + minor`)
    pub const fn packed(self) -> u16 {
        (self.major as u16) << 8 | self.minor as u16
    }

    pub const fn from_packed(packed: u16) -> Self {
        Self {
            major: (packed >> 8) as u8,
            minor: (packed & 0xff) as u8,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Interaction state of a response stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Open = 1,
    /// Snapshot image; no updates will follow
    NonStreaming = 2,
    /// Closed, do not retry
    Closed = 3,
    /// Closed, the requester may retry later
    ClosedRecover = 4,
}

impl StreamState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Open),
            2 => Some(Self::NonStreaming),
            3 => Some(Self::Closed),
            4 => Some(Self::ClosedRecover),
            _ => None,
        }
    }
}

/// Status code attached to a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    None = 0,
    NotFound = 1,
    InvalidArgument = 2,
    Error = 3,
}

impl StatusCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::NotFound),
            2 => Some(Self::InvalidArgument),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// A downstream request for one instrument's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Channel to reply on
    pub channel: ChannelId,
    /// Protocol version negotiated on the channel
    pub protocol: ProtocolVersion,
    /// Requester's stream token
    pub token: StreamId,
    pub service_id: ServiceId,
    /// Requested instrument
    pub item_name: String,
    /// Echo the message key on close responses
    pub use_attrib_info: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_field_ranges() {
        assert!(fields::is_payload(240));
        assert!(fields::is_payload(253));
        assert!(fields::is_payload(800));
        assert!(fields::is_payload(813));
        assert!(!fields::is_payload(239));
        assert!(!fields::is_payload(814));
        assert!(!fields::is_payload(fields::NEXT_LINK));
        assert_eq!(fields::MAX_PAYLOAD_VALUES, 28);
        assert_eq!(fields::LINKS_PER_PAGE, 14);
    }

    #[test]
    fn test_next_link_ids() {
        assert!(fields::is_next_link(238));
        assert!(fields::is_next_link(815));
        assert!(!fields::is_next_link(240));
    }

    #[test]
    fn test_protocol_version_packing() {
        let v = ProtocolVersion::new(14, 1);
        assert_eq!(v.packed(), 14 * 256 + 1);
        assert_eq!(ProtocolVersion::from_packed(v.packed()), v);
        assert_eq!(v.to_string(), "14.1");
    }

    #[test]
    fn test_status_round_trip_from_u8() {
        assert_eq!(StreamState::from_u8(4), Some(StreamState::ClosedRecover));
        assert_eq!(StreamState::from_u8(9), None);
        assert_eq!(StatusCode::from_u8(1), Some(StatusCode::NotFound));
    }
}
