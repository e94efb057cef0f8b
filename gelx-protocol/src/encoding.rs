/*!
Buffer primitives shared by all message and codec implementations.

[`Output`] accumulates one outgoing message: the 8-bit message tag is
written first, the 32-bit big-endian length is reserved and patched once
the payload is complete. [`Input`] is a bounded view over one received
frame; every read is checked and over-reads surface as
[`DecodeError::Underflow`]. [`MessageBuffer`] accumulates raw inbound
bytes and splits off whole frames.
*/

use std::collections::HashMap;
use std::convert::TryFrom;
use std::ops::Deref;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::Uuid;

use crate::errors::{self, DecodeError, EncodeError};
use crate::features::ProtocolVersion;

/// String-keyed annotations (protocol >= 3.0).
pub type Annotations = HashMap<String, String>;

/// Numeric-keyed attributes: error attributes and legacy headers.
pub type KeyValues = HashMap<u16, Bytes>;

/// A pre-baked Sync message frame.
pub const SYNC_MESSAGE: &[u8] = b"S\0\0\0\x04";

/// A bounded, protocol-tagged read view over one frame.
pub struct Input {
    proto: ProtocolVersion,
    bytes: Bytes,
}

impl Input {
    pub fn new(proto: ProtocolVersion, bytes: Bytes) -> Input {
        Input { proto, bytes }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    /// A sub-view sharing the protocol version.
    pub fn slice(&self, range: std::ops::RangeTo<usize>) -> Input {
        Input {
            proto: self.proto.clone(),
            bytes: self.bytes.slice(range),
        }
    }
    pub fn ensure(&self, n: usize) -> Result<(), DecodeError> {
        ensure!(self.bytes.remaining() >= n, errors::Underflow);
        Ok(())
    }
    /// Fail with `ExtraData` unless the view was fully consumed.
    pub fn expect_end(&self) -> Result<(), DecodeError> {
        ensure!(self.bytes.remaining() == 0, errors::ExtraData);
        Ok(())
    }
}

impl Buf for Input {
    fn remaining(&self) -> usize {
        self.bytes.remaining()
    }
    fn chunk(&self) -> &[u8] {
        self.bytes.chunk()
    }
    fn advance(&mut self, cnt: usize) {
        self.bytes.advance(cnt)
    }
    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        self.bytes.copy_to_bytes(len)
    }
}

impl Deref for Input {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

/// A protocol-tagged write view over an output buffer.
pub struct Output<'a> {
    proto: &'a ProtocolVersion,
    buf: &'a mut BytesMut,
}

impl<'a> Output<'a> {
    pub fn new(proto: &'a ProtocolVersion, buf: &'a mut BytesMut) -> Output<'a> {
        Output { proto, buf }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        self.proto
    }
    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional)
    }
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data)
    }
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    pub fn put_u8(&mut self, val: u8) {
        self.buf.put_u8(val)
    }
    pub fn put_u16(&mut self, val: u16) {
        self.buf.put_u16(val)
    }
    pub fn put_u32(&mut self, val: u32) {
        self.buf.put_u32(val)
    }
    pub fn put_u64(&mut self, val: u64) {
        self.buf.put_u64(val)
    }
    pub fn put_i16(&mut self, val: i16) {
        self.buf.put_i16(val)
    }
    pub fn put_i32(&mut self, val: i32) {
        self.buf.put_i32(val)
    }
    pub fn put_i64(&mut self, val: i64) {
        self.buf.put_i64(val)
    }
    fn patch_u32(&mut self, at: usize, val: u32) {
        self.buf[at..at + 4].copy_from_slice(&val.to_be_bytes());
    }
}

pub trait Encode {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError>;
}

pub trait Decode: Sized {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError>;
}

/// Write one message envelope: tag, then a length patched afterwards.
pub fn encode<T: Encode>(buf: &mut Output, code: u8, msg: &T) -> Result<(), EncodeError> {
    buf.reserve(5);
    buf.put_u8(code);
    let base = buf.len();
    buf.put_u32(0);
    msg.encode(buf)?;
    let size = u32::try_from(buf.len() - base)
        .ok()
        .context(errors::MessageTooLong)?;
    buf.patch_u32(base, size);
    Ok(())
}

impl Encode for String {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.as_str().encode(buf)
    }
}

impl Encode for &str {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len())
            .ok()
            .context(errors::ElementTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend(self.as_bytes());
        Ok(())
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len())
            .ok()
            .context(errors::ElementTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend(self);
        Ok(())
    }
}

impl Encode for Uuid {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(16);
        buf.extend(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        buf.ensure(4)?;
        let len = buf.get_u32() as usize;
        buf.ensure(len)?;
        let data = buf.copy_to_bytes(len);
        let text = std::str::from_utf8(&data).context(errors::InvalidUtf8)?;
        Ok(text.to_owned())
    }
}

impl Decode for Bytes {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        buf.ensure(4)?;
        let len = buf.get_u32() as usize;
        buf.ensure(len)?;
        Ok(buf.copy_to_bytes(len))
    }
}

impl Decode for Uuid {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        buf.ensure(16)?;
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }
}

/// Write a string-keyed annotation map with a 16-bit count prefix.
///
/// `None` is emitted as an empty map.
pub fn encode_annotations(
    annotations: &Option<Arc<Annotations>>,
    buf: &mut Output,
) -> Result<(), EncodeError> {
    buf.reserve(2);
    if let Some(annotations) = annotations.as_deref() {
        buf.put_u16(
            u16::try_from(annotations.len())
                .ok()
                .context(errors::TooManyHeaders)?,
        );
        for (name, value) in annotations {
            name.encode(buf)?;
            value.encode(buf)?;
        }
    } else {
        buf.put_u16(0);
    }
    Ok(())
}

pub fn decode_annotations(buf: &mut Input) -> Result<Annotations, DecodeError> {
    buf.ensure(2)?;
    let count = buf.get_u16();
    let mut annotations = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let name = String::decode(buf)?;
        let value = String::decode(buf)?;
        annotations.insert(name, value);
    }
    Ok(annotations)
}

pub fn encode_key_values(key_values: &KeyValues, buf: &mut Output) -> Result<(), EncodeError> {
    buf.reserve(2);
    buf.put_u16(
        u16::try_from(key_values.len())
            .ok()
            .context(errors::TooManyHeaders)?,
    );
    for (&code, value) in key_values {
        buf.reserve(2);
        buf.put_u16(code);
        value.encode(buf)?;
    }
    Ok(())
}

pub fn decode_key_values(buf: &mut Input) -> Result<KeyValues, DecodeError> {
    buf.ensure(2)?;
    let count = buf.get_u16();
    let mut key_values = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        buf.ensure(2)?;
        let code = buf.get_u16();
        let value = Bytes::decode(buf)?;
        key_values.insert(code, value);
    }
    Ok(key_values)
}

/// Accumulates inbound bytes and splits off whole frames.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    bytes: BytesMut,
}

impl MessageBuffer {
    pub fn new() -> MessageBuffer {
        MessageBuffer::default()
    }
    pub fn feed(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }
    pub fn pending(&self) -> usize {
        self.bytes.len()
    }
    /// Split off one full frame (tag byte plus payload) if available.
    pub fn take_message(&mut self) -> Option<Bytes> {
        if self.bytes.len() < 5 {
            return None;
        }
        let mlen = u32::from_be_bytes([self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4]])
            as usize;
        let frame_len = mlen + 1;
        if self.bytes.len() < frame_len {
            return None;
        }
        Some(self.bytes.split_to(frame_len).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_message_needs_full_frame() {
        let mut buf = MessageBuffer::new();
        buf.feed(b"Z\0\0\0");
        assert!(buf.take_message().is_none());
        buf.feed(b"\x07\0\0");
        assert!(buf.take_message().is_none());
        buf.feed(b"I");
        let msg = buf.take_message().unwrap();
        assert_eq!(&msg[..], b"Z\0\0\0\x07\0\0I");
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn take_message_splits_pipelined_frames() {
        let mut buf = MessageBuffer::new();
        buf.feed(b"S\0\0\0\x04S\0\0\0\x04extra");
        assert_eq!(&buf.take_message().unwrap()[..], SYNC_MESSAGE);
        assert_eq!(&buf.take_message().unwrap()[..], SYNC_MESSAGE);
        assert!(buf.take_message().is_none());
        assert_eq!(buf.pending(), 5);
    }

    #[test]
    fn bounded_input_overread() {
        let proto = ProtocolVersion::current();
        let mut input = Input::new(proto, Bytes::from_static(b"\0\0\0\x05ab"));
        let res = String::decode(&mut input);
        assert!(matches!(res, Err(DecodeError::Underflow { .. })));
    }

    #[test]
    fn trailing_data_detected() {
        let proto = ProtocolVersion::current();
        let input = Input::new(proto, Bytes::from_static(b"ab"));
        assert!(matches!(
            input.expect_end(),
            Err(DecodeError::ExtraData { .. })
        ));
    }

    #[test]
    fn envelope_patches_length() {
        struct Empty;
        impl Encode for Empty {
            fn encode(&self, _buf: &mut Output) -> Result<(), EncodeError> {
                Ok(())
            }
        }
        let proto = ProtocolVersion::current();
        let mut bytes = BytesMut::new();
        encode(&mut Output::new(&proto, &mut bytes), b'S', &Empty).unwrap();
        assert_eq!(&bytes[..], SYNC_MESSAGE);
    }
}
