//! Length-prefixed binary codec
//!
//! Field-list update:
//!
//! ```text
//! u8   tag 'F'
//! u8   major, u8 minor
//! u16  entry count
//! repeat { u16 field id, u16 length (0xFFFF = blank), [u8; length] }
//! ```
//!
//! Response (refresh or status):
//!
//! ```text
//! u8   tag 'R'
//! u8   major, u8 minor
//! u8   class (1 = refresh, 2 = status)
//! u8   flags (clear cache | complete | has key | solicited)
//! i32  token
//! u16  service id
//! u8   stream state, u8 status code
//! u32  part number
//! [u16 length, name]   only with the has-key flag
//! u16 length, text
//! u16 entry count, repeat { u16 length, [u8; length] }
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    CloseDescriptor, FieldMap, FieldValue, MessageClass, Payload, ResponseDescriptor,
    ResponseMessage, WireCodec,
};
use crate::core::{
    DecodeError, DecodeErrorKind, EncodeError, ProtocolVersion, StatusCode, StreamId, StreamState,
};

const FIELD_LIST_TAG: u8 = b'F';
const RESPONSE_TAG: u8 = b'R';

const BLANK_LEN: u16 = 0xFFFF;
const MAX_STR_LEN: usize = 0xFFFE;

const FLAG_CLEAR_CACHE: u8 = 0x01;
const FLAG_COMPLETE: u8 = 0x02;
const FLAG_HAS_KEY: u8 = 0x04;
const FLAG_SOLICITED: u8 = 0x08;

/// Bundled [`WireCodec`] speaking protocol major version 14
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub const SUPPORTED_MAJOR: u8 = ProtocolVersion::CURRENT.major;

    pub fn new() -> Self {
        Self
    }

    /// Encode a field-list update (used by injectors and replay)
    pub fn encode_fields(
        &self,
        version: ProtocolVersion,
        fields: &FieldMap,
    ) -> Result<Bytes, EncodeError> {
        check_encode_version(version)?;
        let count = u16::try_from(fields.len())
            .map_err(|_| EncodeError::new(format!("{} fields exceed the entry limit", fields.len())))?;

        let mut buf = BytesMut::with_capacity(5 + fields.len() * 8);
        buf.put_u8(FIELD_LIST_TAG);
        buf.put_u8(version.major);
        buf.put_u8(version.minor);
        buf.put_u16(count);

        for (id, value) in fields.raw_entries() {
            buf.put_u16(*id);
            match value {
                FieldValue::Blank => buf.put_u16(BLANK_LEN),
                FieldValue::Value(bytes) => put_bytes(&mut buf, bytes)?,
            }
        }
        Ok(buf.freeze())
    }
}

fn check_encode_version(version: ProtocolVersion) -> Result<(), EncodeError> {
    if version.major != BinaryCodec::SUPPORTED_MAJOR {
        return Err(EncodeError::new(format!("unsupported protocol version {}", version)));
    }
    Ok(())
}

fn check_decode_version(
    expected: ProtocolVersion,
    major: u8,
    minor: u8,
) -> Result<(), DecodeError> {
    if major != BinaryCodec::SUPPORTED_MAJOR || major != expected.major {
        return Err(DecodeError::new(
            DecodeErrorKind::UnsupportedVersion,
            format!("message version {}.{}, expected {}", major, minor, expected),
        ));
    }
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), EncodeError> {
    if bytes.len() > MAX_STR_LEN {
        return Err(EncodeError::new(format!("value of {} bytes too long", bytes.len())));
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

fn put_entries(buf: &mut BytesMut, entries: &[String]) -> Result<(), EncodeError> {
    let count = u16::try_from(entries.len())
        .map_err(|_| EncodeError::new(format!("{} entries exceed the entry limit", entries.len())))?;
    buf.put_u16(count);
    for entry in entries {
        put_bytes(buf, entry.as_bytes())?;
    }
    Ok(())
}

/// Bounds-checked reader over a borrowed buffer
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::incomplete(format!(
                "{} needs {} bytes, {} left",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &str) -> Result<u16, DecodeError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self, what: &str) -> Result<i32, DecodeError> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    fn slice(&mut self, len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        self.need(len, what)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, what: &str) -> Result<String, DecodeError> {
        let len = self.u16(what)? as usize;
        let raw = self.slice(len, what)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| DecodeError::invalid(format!("{} is not UTF-8: {}", what, e)))
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.buf.has_remaining() {
            return Err(DecodeError::invalid(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

impl WireCodec for BinaryCodec {
    fn decode_fields(
        &self,
        data: &[u8],
        version: ProtocolVersion,
    ) -> Result<FieldMap, DecodeError> {
        let mut r = Reader::new(data);
        let tag = r.u8("tag")?;
        if tag != FIELD_LIST_TAG {
            return Err(DecodeError::invalid(format!("unexpected tag 0x{:02x}", tag)));
        }
        let major = r.u8("version")?;
        let minor = r.u8("version")?;
        check_decode_version(version, major, minor)?;

        let count = r.u16("entry count")? as usize;
        let mut map = FieldMap::with_capacity(count);
        for _ in 0..count {
            let id = r.u16("field id")?;
            let len = r.u16("field length")?;
            if len == BLANK_LEN {
                map.push_blank(id);
            } else {
                let raw = r.slice(len as usize, "field value")?;
                map.push(id, FieldValue::Value(Bytes::copy_from_slice(raw)));
            }
        }
        r.finish()?;
        Ok(map)
    }

    fn encode_response(
        &self,
        version: ProtocolVersion,
        d: &ResponseDescriptor<'_>,
    ) -> Result<Bytes, EncodeError> {
        check_encode_version(version)?;
        if d.item_name.is_empty() {
            return Err(EncodeError::new("response without item name"));
        }

        let empty: &[String] = &[];
        let entries = match d.payload {
            Payload::Entries(entries) => entries,
            Payload::Cached(Some(image)) => image.entries(),
            Payload::Cached(None) => empty,
        };

        let mut flags = FLAG_HAS_KEY | FLAG_SOLICITED;
        if d.part_number == 0 {
            flags |= FLAG_CLEAR_CACHE;
        }
        if d.is_final {
            flags |= FLAG_COMPLETE;
        }

        let mut buf = BytesMut::with_capacity(32 + d.item_name.len() + entries.len() * 16);
        buf.put_u8(RESPONSE_TAG);
        buf.put_u8(version.major);
        buf.put_u8(version.minor);
        buf.put_u8(MessageClass::Refresh as u8);
        buf.put_u8(flags);
        buf.put_i32(d.token.0);
        buf.put_u16(d.service_id);
        buf.put_u8(StreamState::NonStreaming as u8);
        buf.put_u8(StatusCode::None as u8);
        buf.put_u32(d.part_number);
        put_bytes(&mut buf, d.item_name.as_bytes())?;
        put_bytes(&mut buf, &[])?;
        put_entries(&mut buf, entries)?;
        Ok(buf.freeze())
    }

    fn encode_close(
        &self,
        version: ProtocolVersion,
        d: &CloseDescriptor<'_>,
    ) -> Result<Bytes, EncodeError> {
        check_encode_version(version)?;

        let mut flags = FLAG_COMPLETE | FLAG_SOLICITED;
        if d.include_key {
            flags |= FLAG_HAS_KEY;
        }

        let mut buf = BytesMut::with_capacity(32 + d.item_name.len() + d.text.len());
        buf.put_u8(RESPONSE_TAG);
        buf.put_u8(version.major);
        buf.put_u8(version.minor);
        buf.put_u8(MessageClass::Status as u8);
        buf.put_u8(flags);
        buf.put_i32(d.token.0);
        buf.put_u16(d.service_id);
        buf.put_u8(d.state as u8);
        buf.put_u8(d.code as u8);
        buf.put_u32(0);
        if d.include_key {
            put_bytes(&mut buf, d.item_name.as_bytes())?;
        }
        put_bytes(&mut buf, d.text.as_bytes())?;
        buf.put_u16(0);
        Ok(buf.freeze())
    }

    fn decode_response(
        &self,
        data: &[u8],
        version: ProtocolVersion,
    ) -> Result<ResponseMessage, DecodeError> {
        let mut r = Reader::new(data);
        let tag = r.u8("tag")?;
        if tag != RESPONSE_TAG {
            return Err(DecodeError::invalid(format!("unexpected tag 0x{:02x}", tag)));
        }
        let major = r.u8("version")?;
        let minor = r.u8("version")?;
        check_decode_version(version, major, minor)?;

        let class = match r.u8("class")? {
            1 => MessageClass::Refresh,
            2 => MessageClass::Status,
            other => return Err(DecodeError::invalid(format!("unknown message class {}", other))),
        };
        let flags = r.u8("flags")?;
        let token = StreamId(r.i32("token")?);
        let service_id = r.u16("service id")?;
        let raw_state = r.u8("stream state")?;
        let state = StreamState::from_u8(raw_state)
            .ok_or_else(|| DecodeError::invalid(format!("unknown stream state {}", raw_state)))?;
        let raw_code = r.u8("status code")?;
        let code = StatusCode::from_u8(raw_code)
            .ok_or_else(|| DecodeError::invalid(format!("unknown status code {}", raw_code)))?;
        let part_number = r.u32("part number")?;

        let item_name = if flags & FLAG_HAS_KEY != 0 {
            Some(r.string("item name")?)
        } else {
            None
        };
        let text = r.string("status text")?;

        let count = r.u16("entry count")? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(r.string("entry")?);
        }
        r.finish()?;

        Ok(ResponseMessage {
            class,
            token,
            service_id,
            item_name,
            part_number,
            clear_cache: flags & FLAG_CLEAR_CACHE != 0,
            complete: flags & FLAG_COMPLETE != 0,
            state,
            code,
            text,
            entries,
        })
    }

    fn name(&self) -> &'static str {
        "binary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldLookup;

    const V: ProtocolVersion = ProtocolVersion::CURRENT;

    #[test]
    fn test_field_list_keeps_blanks_and_duplicates() {
        let codec = BinaryCodec::new();
        let mut map = FieldMap::new();
        map.push_str(238, "FOO.1");
        map.push_blank(240);
        map.push_str(800, "X");
        map.push_str(238, "ignored");

        let bytes = codec.encode_fields(V, &map).unwrap();
        let decoded = codec.decode_fields(&bytes, V).unwrap();

        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.get(238), FieldLookup::Value(b"FOO.1"));
        assert!(decoded.get(240).is_blank());
        assert_eq!(decoded.get(800), FieldLookup::Value(b"X"));
    }

    #[test]
    fn test_truncated_field_list_is_incomplete() {
        let codec = BinaryCodec::new();
        let mut map = FieldMap::new();
        map.push_str(240, "ABCDEF");
        let bytes = codec.encode_fields(V, &map).unwrap();

        let err = codec.decode_fields(&bytes[..bytes.len() - 2], V).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::IncompleteData);
    }

    #[test]
    fn test_wrong_tag_is_invalid() {
        let codec = BinaryCodec::new();
        let err = codec.decode_fields(&[b'X', 14, 1, 0, 0], V).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidData);
    }

    #[test]
    fn test_unsupported_version() {
        let codec = BinaryCodec::new();
        let err = codec.decode_fields(&[b'F', 13, 0, 0, 0], V).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnsupportedVersion);

        assert!(codec
            .encode_fields(ProtocolVersion::new(13, 0), &FieldMap::new())
            .is_err());
    }

    #[test]
    fn test_response_flags() {
        let codec = BinaryCodec::new();
        let entries = vec!["A".to_string(), "B".to_string()];
        let descriptor = ResponseDescriptor {
            token: StreamId(7),
            service_id: 1,
            item_name: "FOO",
            part_number: 0,
            is_final: false,
            payload: Payload::Entries(&entries),
        };
        let bytes = codec.encode_response(V, &descriptor).unwrap();
        let msg = codec.decode_response(&bytes, V).unwrap();

        assert_eq!(msg.class, MessageClass::Refresh);
        assert_eq!(msg.token, StreamId(7));
        assert_eq!(msg.item_name.as_deref(), Some("FOO"));
        assert!(msg.clear_cache);
        assert!(!msg.complete);
        assert_eq!(msg.state, StreamState::NonStreaming);
        assert_eq!(msg.entries, entries);

        let last = ResponseDescriptor {
            part_number: 2,
            is_final: true,
            payload: Payload::Cached(None),
            ..descriptor
        };
        let msg = codec
            .decode_response(&codec.encode_response(V, &last).unwrap(), V)
            .unwrap();
        assert!(!msg.clear_cache);
        assert!(msg.complete);
        assert_eq!(msg.part_number, 2);
        assert!(msg.entries.is_empty());
    }

    #[test]
    fn test_response_requires_item_name() {
        let codec = BinaryCodec::new();
        let descriptor = ResponseDescriptor {
            token: StreamId(1),
            service_id: 1,
            item_name: "",
            part_number: 0,
            is_final: true,
            payload: Payload::Cached(None),
        };
        assert!(codec.encode_response(V, &descriptor).is_err());
    }

    #[test]
    fn test_close_key_echo() {
        let codec = BinaryCodec::new();
        let mut descriptor = CloseDescriptor {
            token: StreamId(3),
            service_id: 9,
            item_name: "BAR",
            include_key: false,
            state: StreamState::Closed,
            code: StatusCode::NotFound,
            text: "Not found in symbol set.",
        };

        let msg = codec
            .decode_response(&codec.encode_close(V, &descriptor).unwrap(), V)
            .unwrap();
        assert_eq!(msg.class, MessageClass::Status);
        assert_eq!(msg.item_name, None);
        assert_eq!(msg.code, StatusCode::NotFound);
        assert_eq!(msg.text, "Not found in symbol set.");
        assert!(msg.complete);

        descriptor.include_key = true;
        let msg = codec
            .decode_response(&codec.encode_close(V, &descriptor).unwrap(), V)
            .unwrap();
        assert_eq!(msg.item_name.as_deref(), Some("BAR"));
    }
}
