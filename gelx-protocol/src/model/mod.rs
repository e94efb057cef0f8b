/*!
Scalar value types mirroring the database's wire representations.
*/

mod bignum;
mod json;
mod memory;
mod time;
pub(crate) mod vector;

pub use bignum::{BigInt, Decimal};
pub use json::Json;
pub use memory::ConfigMemory;
pub use time::{
    DateDuration, Datetime, Duration, LocalDate, LocalDatetime, LocalTime, RelativeDuration,
};
pub use vector::SparseVector;

pub use uuid::Uuid;

/// An error converting an out-of-range value into a model type.
#[derive(Debug, PartialEq, derive_more::Display, derive_more::Error)]
#[display("value is out of range for the target type")]
pub struct OutOfRangeError;
