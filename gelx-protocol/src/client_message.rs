/*!
The [ClientMessage] enum and related types.

```rust,ignore
pub enum ClientMessage {
    ClientHandshake(ClientHandshake),
    AuthenticationSaslInitialResponse(SaslInitialResponse),
    AuthenticationSaslResponse(SaslResponse),
    Parse(Parse),
    Execute(Execute),
    Dump(Dump),
    Restore(Restore),
    RestoreBlock(RestoreBlock),
    RestoreEof,
    Sync,
    Flush,
    Terminate,
    UnknownMessage(u8, Bytes),
}
```
*/

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use snafu::OptionExt;
use uuid::Uuid;

pub use crate::common::CompilationOptions;
pub use crate::common::DumpFlags;
pub use crate::common::{Capabilities, Cardinality, CompilationFlags};
pub use crate::common::{InputLanguage, IoFormat};
pub use crate::common::{RawTypedesc, State};
use crate::encoding::{
    decode_annotations, decode_key_values, encode, encode_annotations, encode_key_values,
};
use crate::encoding::{Annotations, Decode, Encode, Input, KeyValues, Output};
use crate::errors::{self, DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientMessage {
    ClientHandshake(ClientHandshake),
    AuthenticationSaslInitialResponse(SaslInitialResponse),
    AuthenticationSaslResponse(SaslResponse),
    Parse(Parse),
    Execute(Execute),
    Dump(Dump),
    Restore(Restore),
    RestoreBlock(RestoreBlock),
    RestoreEof,
    Sync,
    Flush,
    Terminate,
    UnknownMessage(u8, Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    pub major_ver: u16,
    pub minor_ver: u16,
    pub params: HashMap<String, String>,
    pub extensions: HashMap<String, Annotations>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslInitialResponse {
    pub method: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslResponse {
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    pub annotations: Option<Arc<Annotations>>,
    pub allowed_capabilities: Capabilities,
    pub compilation_flags: CompilationFlags,
    pub implicit_limit: Option<u64>,
    pub output_format: IoFormat,
    pub expected_cardinality: Cardinality,
    pub command_text: String,
    pub state: State,
    pub input_language: InputLanguage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub annotations: Option<Arc<Annotations>>,
    pub allowed_capabilities: Capabilities,
    pub compilation_flags: CompilationFlags,
    pub implicit_limit: Option<u64>,
    pub output_format: IoFormat,
    pub expected_cardinality: Cardinality,
    pub command_text: String,
    pub state: State,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
    pub arguments: Bytes,
    pub input_language: InputLanguage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    pub annotations: Option<Arc<Annotations>>,
    pub flags: DumpFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restore {
    pub headers: KeyValues,
    pub jobs: u16,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreBlock {
    pub data: Bytes,
}

struct Empty;

impl ClientMessage {
    pub fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        use ClientMessage::*;
        match self {
            ClientHandshake(h) => encode(buf, 0x56, h),
            AuthenticationSaslInitialResponse(h) => encode(buf, 0x70, h),
            AuthenticationSaslResponse(h) => encode(buf, 0x72, h),
            Parse(h) => encode(buf, 0x50, h),
            Execute(h) => encode(buf, 0x4f, h),
            Dump(h) => encode(buf, 0x3e, h),
            Restore(h) => encode(buf, 0x3c, h),
            RestoreBlock(h) => encode(buf, 0x3d, h),
            RestoreEof => encode(buf, 0x2e, &Empty),
            Sync => encode(buf, 0x53, &Empty),
            Flush => encode(buf, 0x48, &Empty),
            Terminate => encode(buf, 0x58, &Empty),

            UnknownMessage(_, _) => errors::UnknownMessageCantBeEncoded.fail()?,
        }
    }

    /// Decode exactly one frame from the buffer.
    ///
    /// The buffer must hold a complete framed message.
    pub fn decode(buf: &mut Input) -> Result<ClientMessage, DecodeError> {
        use self::ClientMessage as M;
        buf.ensure(5)?;
        let tag = buf[0];
        buf.advance(5);
        let result = match tag {
            0x56 => ClientHandshake::decode(buf).map(M::ClientHandshake)?,
            0x70 => SaslInitialResponse::decode(buf).map(M::AuthenticationSaslInitialResponse)?,
            0x72 => SaslResponse::decode(buf).map(M::AuthenticationSaslResponse)?,
            0x50 => Parse::decode(buf).map(M::Parse)?,
            0x4f => Execute::decode(buf).map(M::Execute)?,
            0x3e => Dump::decode(buf).map(M::Dump)?,
            0x3c => Restore::decode(buf).map(M::Restore)?,
            0x3d => RestoreBlock::decode(buf).map(M::RestoreBlock)?,
            0x2e => M::RestoreEof,
            0x53 => M::Sync,
            0x48 => M::Flush,
            0x58 => M::Terminate,
            tag => M::UnknownMessage(tag, buf.copy_to_bytes(buf.remaining())),
        };
        buf.expect_end()?;
        Ok(result)
    }
}

impl Encode for Empty {
    fn encode(&self, _buf: &mut Output) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl Encode for ClientHandshake {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(8);
        buf.put_u16(self.major_ver);
        buf.put_u16(self.minor_ver);
        buf.put_u16(
            u16::try_from(self.params.len())
                .ok()
                .context(errors::TooManyParams)?,
        );
        for (k, v) in &self.params {
            k.encode(buf)?;
            v.encode(buf)?;
        }
        buf.reserve(2);
        buf.put_u16(
            u16::try_from(self.extensions.len())
                .ok()
                .context(errors::TooManyExtensions)?,
        );
        for (name, annotations) in &self.extensions {
            name.encode(buf)?;
            encode_annotations(&Some(Arc::new(annotations.clone())), buf)?;
        }
        Ok(())
    }
}

impl Decode for ClientHandshake {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        buf.ensure(6)?;
        let major_ver = buf.get_u16();
        let minor_ver = buf.get_u16();
        let num_params = buf.get_u16();
        let mut params = HashMap::with_capacity(num_params as usize);
        for _ in 0..num_params {
            let name = String::decode(buf)?;
            let value = String::decode(buf)?;
            params.insert(name, value);
        }
        buf.ensure(2)?;
        let num_extensions = buf.get_u16();
        let mut extensions = HashMap::with_capacity(num_extensions as usize);
        for _ in 0..num_extensions {
            let name = String::decode(buf)?;
            let annotations = decode_annotations(buf)?;
            extensions.insert(name, annotations);
        }
        Ok(ClientHandshake {
            major_ver,
            minor_ver,
            params,
            extensions,
        })
    }
}

impl Encode for SaslInitialResponse {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.method.encode(buf)?;
        self.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for SaslInitialResponse {
    fn decode(buf: &mut Input) -> Result<SaslInitialResponse, DecodeError> {
        let method = String::decode(buf)?;
        let data = Bytes::decode(buf)?;
        Ok(SaslInitialResponse { method, data })
    }
}

impl Encode for SaslResponse {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for SaslResponse {
    fn decode(buf: &mut Input) -> Result<SaslResponse, DecodeError> {
        let data = Bytes::decode(buf)?;
        Ok(SaslResponse { data })
    }
}

fn encode_parse_prefix(
    buf: &mut Output,
    annotations: &Option<Arc<Annotations>>,
    allowed_capabilities: Capabilities,
    compilation_flags: CompilationFlags,
    implicit_limit: Option<u64>,
    input_language: InputLanguage,
    output_format: IoFormat,
    expected_cardinality: Cardinality,
) -> Result<(), EncodeError> {
    encode_annotations(annotations, buf)?;
    buf.reserve(3 * 8 + 3);
    buf.put_u64(allowed_capabilities.bits());
    buf.put_u64(compilation_flags.bits());
    buf.put_u64(implicit_limit.unwrap_or(0));
    if buf.proto().is_3() {
        buf.put_u8(input_language as u8);
    }
    buf.put_u8(output_format as u8);
    buf.put_u8(expected_cardinality as u8);
    Ok(())
}

struct ParsePrefix {
    annotations: Option<Arc<Annotations>>,
    allowed_capabilities: Capabilities,
    compilation_flags: CompilationFlags,
    implicit_limit: Option<u64>,
    input_language: InputLanguage,
    output_format: IoFormat,
    expected_cardinality: Cardinality,
}

fn decode_parse_prefix(buf: &mut Input) -> Result<ParsePrefix, DecodeError> {
    let annotations = decode_annotations(buf)?;
    let annotations = if annotations.is_empty() {
        None
    } else {
        Some(Arc::new(annotations))
    };
    buf.ensure(3 * 8 + 2)?;
    let allowed_capabilities = decode_capabilities(buf.get_u64())?;
    let compilation_flags = decode_compilation_flags(buf.get_u64())?;
    let implicit_limit = match buf.get_u64() {
        0 => None,
        val => Some(val),
    };
    let input_language = if buf.proto().is_3() {
        buf.ensure(1)?;
        InputLanguage::try_from(buf.get_u8())?
    } else {
        InputLanguage::EdgeQL
    };
    buf.ensure(2)?;
    let output_format = IoFormat::try_from(buf.get_u8())?;
    let expected_cardinality = Cardinality::try_from(buf.get_u8())?;
    Ok(ParsePrefix {
        annotations,
        allowed_capabilities,
        compilation_flags,
        implicit_limit,
        input_language,
        output_format,
        expected_cardinality,
    })
}

impl Encode for Parse {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_parse_prefix(
            buf,
            &self.annotations,
            self.allowed_capabilities,
            self.compilation_flags,
            self.implicit_limit,
            self.input_language,
            self.output_format,
            self.expected_cardinality,
        )?;
        self.command_text.encode(buf)?;
        self.state.typedesc_id.encode(buf)?;
        self.state.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for Parse {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let prefix = decode_parse_prefix(buf)?;
        let command_text = String::decode(buf)?;
        let typedesc_id = Uuid::decode(buf)?;
        let data = Bytes::decode(buf)?;
        Ok(Parse {
            annotations: prefix.annotations,
            allowed_capabilities: prefix.allowed_capabilities,
            compilation_flags: prefix.compilation_flags,
            implicit_limit: prefix.implicit_limit,
            output_format: prefix.output_format,
            expected_cardinality: prefix.expected_cardinality,
            command_text,
            state: State { typedesc_id, data },
            input_language: prefix.input_language,
        })
    }
}

impl Encode for Execute {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_parse_prefix(
            buf,
            &self.annotations,
            self.allowed_capabilities,
            self.compilation_flags,
            self.implicit_limit,
            self.input_language,
            self.output_format,
            self.expected_cardinality,
        )?;
        self.command_text.encode(buf)?;
        self.state.typedesc_id.encode(buf)?;
        self.state.data.encode(buf)?;
        self.input_typedesc_id.encode(buf)?;
        self.output_typedesc_id.encode(buf)?;
        self.arguments.encode(buf)?;
        Ok(())
    }
}

impl Decode for Execute {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let prefix = decode_parse_prefix(buf)?;
        let command_text = String::decode(buf)?;
        let typedesc_id = Uuid::decode(buf)?;
        let data = Bytes::decode(buf)?;
        let input_typedesc_id = Uuid::decode(buf)?;
        let output_typedesc_id = Uuid::decode(buf)?;
        let arguments = Bytes::decode(buf)?;
        Ok(Execute {
            annotations: prefix.annotations,
            allowed_capabilities: prefix.allowed_capabilities,
            compilation_flags: prefix.compilation_flags,
            implicit_limit: prefix.implicit_limit,
            output_format: prefix.output_format,
            expected_cardinality: prefix.expected_cardinality,
            command_text,
            state: State { typedesc_id, data },
            input_typedesc_id,
            output_typedesc_id,
            arguments,
            input_language: prefix.input_language,
        })
    }
}

impl Encode for Dump {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        if buf.proto().is_3() {
            encode_annotations(&self.annotations, buf)?;
            buf.reserve(8);
            buf.put_u64(self.flags.bits());
        } else {
            // older protocols use an (empty) numeric header map
            encode_key_values(&KeyValues::new(), buf)?;
        }
        Ok(())
    }
}

impl Decode for Dump {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        if buf.proto().is_3() {
            let annotations = decode_annotations(buf)?;
            buf.ensure(8)?;
            let flags = DumpFlags::from_bits_retain(buf.get_u64());
            Ok(Dump {
                annotations: Some(Arc::new(annotations)),
                flags,
            })
        } else {
            let _headers = decode_key_values(buf)?;
            Ok(Dump {
                annotations: None,
                flags: DumpFlags::empty(),
            })
        }
    }
}

impl Encode for Restore {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_key_values(&self.headers, buf)?;
        buf.reserve(2 + self.data.len());
        buf.put_u16(self.jobs);
        buf.extend(&self.data);
        Ok(())
    }
}

impl Decode for Restore {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let headers = decode_key_values(buf)?;
        buf.ensure(2)?;
        let jobs = buf.get_u16();
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(Restore {
            headers,
            jobs,
            data,
        })
    }
}

impl Encode for RestoreBlock {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.extend(&self.data);
        Ok(())
    }
}

impl Decode for RestoreBlock {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        Ok(RestoreBlock {
            data: buf.copy_to_bytes(buf.remaining()),
        })
    }
}

impl Parse {
    pub fn new(
        opts: &CompilationOptions,
        query: &str,
        state: State,
        annotations: Option<Arc<Annotations>>,
    ) -> Parse {
        Parse {
            annotations,
            allowed_capabilities: opts.allow_capabilities,
            compilation_flags: opts.flags(),
            implicit_limit: opts.implicit_limit,
            output_format: opts.io_format,
            expected_cardinality: opts.expected_cardinality,
            command_text: query.into(),
            state,
            input_language: opts.input_language,
        }
    }
}

fn decode_capabilities(val: u64) -> Result<Capabilities, DecodeError> {
    Capabilities::from_bits(val)
        .ok_or_else(|| errors::InvalidCapabilities { capabilities: val }.build())
}

fn decode_compilation_flags(val: u64) -> Result<CompilationFlags, DecodeError> {
    CompilationFlags::from_bits(val).ok_or_else(|| {
        errors::InvalidCompilationFlags {
            compilation_flags: val,
        }
        .build()
    })
}
