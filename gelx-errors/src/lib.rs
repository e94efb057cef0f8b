//! Error handling for the gelx database client.
//!
//! All errors that the client surfaces are values of the single [`Error`]
//! type, carrying a hierarchical 32-bit code. Error classes are zero-sized
//! marker types implementing [`ErrorKind`]; a concrete error can be tested
//! against any level of the hierarchy:
//!
//! ```rust
//! # use gelx_errors::{Error, ErrorKind, TransactionSerializationError, TransactionError};
//! let err = TransactionSerializationError::with_message("serialization failure");
//! assert!(err.is::<TransactionSerializationError>());
//! assert!(err.is::<TransactionError>());
//! ```
mod error;
mod fields;
mod kinds;
mod traits;

pub use error::{Error, Tag};
pub use kinds::*;
pub use traits::{ErrorKind, Field, ResultExt};

pub mod fields_map {
    //! Numeric attribute codes used in `ErrorResponse` messages.
    pub const HINT: u16 = 0x0001;
    pub const DETAILS: u16 = 0x0002;
    pub const SERVER_TRACEBACK: u16 = 0x0101;
    pub const POSITION_START: u16 = 0xFFF1;
    pub const POSITION_END: u16 = 0xFFF2;
    pub const LINE_START: u16 = 0xFFF3;
    pub const COLUMN_START: u16 = 0xFFF4;
}

pub use fields::{Capabilities, QueryText};
