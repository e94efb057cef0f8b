/*!
Low-level protocol implementation for the gelx database client.

This crate contains everything needed to speak the binary protocol:

* [`encoding`] — framed read/write buffers and the primitive field codecs;
* [`client_message`] / [`server_message`] — the message enums;
* [`descriptors`] — the self-describing type-descriptor decoder;
* [`codec`] / [`registry`] — the codec tree builder and its shared cache;
* [`value`] / [`model`] — the dynamic value sum and scalar wrapper types.

Applications should use `gelx-client` instead, which drives these pieces
over a socket.
*/

pub mod annotations;
pub mod client_message;
pub mod codec;
pub mod common;
pub mod descriptors;
pub mod encoding;
pub mod errors;
pub mod features;
pub mod model;
pub mod query_arg;
pub mod registry;
pub mod server_message;
pub mod shape;
pub mod value;

pub use crate::common::{Capabilities, Cardinality, InputLanguage, IoFormat, TransactionState};
pub use crate::features::ProtocolVersion;
pub use crate::value::Value;
