//! Wire codec boundary
//!
//! The core never touches raw bytes directly. Everything it needs from the wire
//! goes through [`WireCodec`]:
//!
//! - `decode_fields`: upstream field-list update -> [`FieldMap`]
//! - `encode_response`: one part of a chain (string payload or cached snapshot)
//! - `encode_close`: terminal status response (not found, recoverable error, ...)
//! - `decode_response`: canonical message -> [`ResponseMessage`] for cache application
//!
//! [`BinaryCodec`] is the bundled implementation.

pub mod binary;

pub use binary::BinaryCodec;

use bytes::Bytes;

use crate::cache::PayloadImage;
use crate::core::{
    DecodeError, EncodeError, FieldId, ProtocolVersion, ServiceId, StatusCode, StreamId,
    StreamState,
};

/// Raw value of one field entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Explicitly blank on the wire
    Blank,
    Value(Bytes),
}

/// Result of looking a field up in a [`FieldMap`]
///
/// Zero-length values are reported as `Blank`; consumers never have to
/// distinguish the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLookup<'a> {
    Blank,
    Value(&'a [u8]),
    Absent,
}

impl<'a> FieldLookup<'a> {
    fn from_value(value: &'a FieldValue) -> Self {
        match value {
            FieldValue::Blank => FieldLookup::Blank,
            FieldValue::Value(bytes) if bytes.is_empty() => FieldLookup::Blank,
            FieldValue::Value(bytes) => FieldLookup::Value(bytes),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, FieldLookup::Blank)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldLookup::Absent)
    }
}

/// Decoded field-list message, entries kept in encounter order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(FieldId, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, id: FieldId, value: FieldValue) {
        self.entries.push((id, value));
    }

    pub fn push_str(&mut self, id: FieldId, value: &str) {
        self.push(id, FieldValue::Value(Bytes::copy_from_slice(value.as_bytes())));
    }

    pub fn push_blank(&mut self, id: FieldId) {
        self.push(id, FieldValue::Blank);
    }

    /// Look up the first occurrence of a field
    pub fn get(&self, id: FieldId) -> FieldLookup<'_> {
        self.entries
            .iter()
            .find(|(field, _)| *field == id)
            .map(|(_, value)| FieldLookup::from_value(value))
            .unwrap_or(FieldLookup::Absent)
    }

    /// Iterate entries in encounter order
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, FieldLookup<'_>)> {
        self.entries
            .iter()
            .map(|(id, value)| (*id, FieldLookup::from_value(value)))
    }

    pub(crate) fn raw_entries(&self) -> &[(FieldId, FieldValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Body of a response part
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Ordered string entries (chain page values)
    Entries(&'a [String]),
    /// Snapshot handle; `None` encodes an empty body
    Cached(Option<&'a PayloadImage>),
}

/// Everything needed to encode one response part
#[derive(Debug, Clone, Copy)]
pub struct ResponseDescriptor<'a> {
    pub token: StreamId,
    pub service_id: ServiceId,
    pub item_name: &'a str,
    /// Zero-based; part 0 also clears the requester's cache
    pub part_number: u32,
    pub is_final: bool,
    pub payload: Payload<'a>,
}

/// Everything needed to encode a terminal status response
#[derive(Debug, Clone, Copy)]
pub struct CloseDescriptor<'a> {
    pub token: StreamId,
    pub service_id: ServiceId,
    pub item_name: &'a str,
    /// Echo the message key (attribute info)
    pub include_key: bool,
    pub state: StreamState,
    pub code: StatusCode,
    pub text: &'a str,
}

/// Response message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageClass {
    Refresh = 1,
    Status = 2,
}

/// Decoded response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub class: MessageClass,
    pub token: StreamId,
    pub service_id: ServiceId,
    /// `None` when the key was not echoed
    pub item_name: Option<String>,
    pub part_number: u32,
    pub clear_cache: bool,
    pub complete: bool,
    pub state: StreamState,
    pub code: StatusCode,
    pub text: String,
    pub entries: Vec<String>,
}

/// Wire codec collaborator
pub trait WireCodec: Send + Sync {
    /// Decode an upstream field-list update
    fn decode_fields(&self, data: &[u8], version: ProtocolVersion)
        -> Result<FieldMap, DecodeError>;

    /// Encode one response part
    fn encode_response(
        &self,
        version: ProtocolVersion,
        descriptor: &ResponseDescriptor<'_>,
    ) -> Result<Bytes, EncodeError>;

    /// Encode a terminal status response
    fn encode_close(
        &self,
        version: ProtocolVersion,
        descriptor: &CloseDescriptor<'_>,
    ) -> Result<Bytes, EncodeError>;

    /// Decode a response message (used to feed canonical messages to the cache)
    fn decode_response(
        &self,
        data: &[u8],
        version: ProtocolVersion,
    ) -> Result<ResponseMessage, DecodeError>;

    /// Codec name for logging
    fn name(&self) -> &'static str;
}
