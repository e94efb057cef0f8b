/*!
Capabilities, compilation flags and the small enums shared between
client and server messages.
*/

use bytes::Bytes;
use uuid::Uuid;

use crate::descriptors::Typedesc;
use crate::encoding::Input;
use crate::errors::{self, DecodeError};
use crate::features::ProtocolVersion;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        const MODIFICATIONS =       0b00000001;
        const SESSION_CONFIG =      0b00000010;
        const TRANSACTION =         0b00000100;
        const DDL =                 0b00001000;
        const PERSISTENT_CONFIG =   0b00010000;
        const ALL =                 0b00011111;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CompilationFlags: u64 {
        const INJECT_OUTPUT_TYPE_IDS =       0b00000001;
        const INJECT_OUTPUT_TYPE_NAMES =     0b00000010;
        const INJECT_OUTPUT_OBJECT_IDS =     0b00000100;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DumpFlags: u64 {
        const DUMP_SECRETS =                 0b00000001;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cardinality {
    NoResult = 0x6e,
    AtMostOne = 0x6f,
    One = 0x41,
    Many = 0x6d,
    AtLeastOne = 0x4d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IoFormat {
    Binary = 0x62,
    Json = 0x6a,
    JsonElements = 0x4a,
    None = 0x6e,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputLanguage {
    EdgeQL = 0x45,
    Sql = 0x53,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// Not in a transaction block.
    NotInTransaction = 0x49,
    /// In a transaction block.
    InTransaction = 0x54,
    /// In a failed transaction block; only rollback is accepted.
    InFailedTransaction = 0x45,
}

impl TryFrom<u8> for Cardinality {
    type Error = DecodeError;
    fn try_from(cardinality: u8) -> Result<Cardinality, DecodeError> {
        match cardinality {
            0x6e => Ok(Cardinality::NoResult),
            0x6f => Ok(Cardinality::AtMostOne),
            0x41 => Ok(Cardinality::One),
            0x6d => Ok(Cardinality::Many),
            0x4d => Ok(Cardinality::AtLeastOne),
            _ => errors::InvalidCardinality { cardinality }.fail(),
        }
    }
}

impl TryFrom<u8> for IoFormat {
    type Error = DecodeError;
    fn try_from(io_format: u8) -> Result<IoFormat, DecodeError> {
        match io_format {
            0x62 => Ok(IoFormat::Binary),
            0x6a => Ok(IoFormat::Json),
            0x4a => Ok(IoFormat::JsonElements),
            0x6e => Ok(IoFormat::None),
            _ => errors::InvalidIoFormat { io_format }.fail(),
        }
    }
}

impl TryFrom<u8> for InputLanguage {
    type Error = DecodeError;
    fn try_from(input_language: u8) -> Result<InputLanguage, DecodeError> {
        match input_language {
            0x45 => Ok(InputLanguage::EdgeQL),
            0x53 => Ok(InputLanguage::Sql),
            _ => errors::InvalidInputLanguage { input_language }.fail(),
        }
    }
}

impl TryFrom<u8> for TransactionState {
    type Error = DecodeError;
    fn try_from(transaction_state: u8) -> Result<TransactionState, DecodeError> {
        match transaction_state {
            0x49 => Ok(TransactionState::NotInTransaction),
            0x54 => Ok(TransactionState::InTransaction),
            0x45 => Ok(TransactionState::InFailedTransaction),
            _ => errors::InvalidTransactionState { transaction_state }.fail(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilationOptions {
    pub implicit_limit: Option<u64>,
    pub implicit_typenames: bool,
    pub implicit_typeids: bool,
    pub allow_capabilities: Capabilities,
    pub explicit_objectids: bool,
    pub io_format: IoFormat,
    pub expected_cardinality: Cardinality,
    pub input_language: InputLanguage,
}

/// Encoded session state sent along with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub typedesc_id: Uuid,
    pub data: Bytes,
}

/// An undecoded type-descriptor blob together with its root id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTypedesc {
    pub proto: ProtocolVersion,
    pub id: Uuid,
    pub data: Bytes,
}

impl RawTypedesc {
    pub fn uninitialized() -> RawTypedesc {
        RawTypedesc {
            proto: ProtocolVersion::current(),
            id: Uuid::from_u128(0),
            data: Bytes::new(),
        }
    }
    pub fn decode(&self) -> Result<Typedesc, DecodeError> {
        let cur = &mut Input::new(self.proto.clone(), self.data.clone());
        Typedesc::decode_with_id(self.id, cur)
    }
}

impl State {
    pub fn empty() -> State {
        State {
            typedesc_id: Uuid::from_u128(0),
            data: Bytes::new(),
        }
    }
    pub fn descriptor_id(&self) -> Uuid {
        self.typedesc_id
    }
}

impl CompilationOptions {
    pub fn flags(&self) -> CompilationFlags {
        let mut cflags = CompilationFlags::empty();
        if self.implicit_typenames {
            cflags |= CompilationFlags::INJECT_OUTPUT_TYPE_NAMES;
        }
        if self.implicit_typeids {
            cflags |= CompilationFlags::INJECT_OUTPUT_TYPE_IDS;
        }
        if !self.explicit_objectids {
            cflags |= CompilationFlags::INJECT_OUTPUT_OBJECT_IDS;
        }
        cflags
    }
}
