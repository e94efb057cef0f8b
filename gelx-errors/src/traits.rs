use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;

use crate::error::{Error, Inner};

/// Implementation detail of the error hierarchy.
///
/// Sealed so that new error classes can only be introduced by this crate
/// (codes must stay coordinated with the server).
pub trait Sealed {
    const CODE: u32;
    const NAME: &'static str;
    const TAGS: u32;

    /// Mask selecting the significant prefix of `CODE`.
    ///
    /// Trailing zero bytes of a class code denote "any subclass".
    fn code_mask() -> u32 {
        if Self::CODE & 0x00_FF_FF_FF == 0 {
            0xFF_00_00_00
        } else if Self::CODE & 0x00_00_FF_FF == 0 {
            0xFF_FF_00_00
        } else if Self::CODE & 0x00_00_00_FF == 0 {
            0xFF_FF_FF_00
        } else {
            0xFF_FF_FF_FF
        }
    }
}

/// An error class (a node of the error hierarchy).
pub trait ErrorKind: Sealed {
    fn build() -> Error {
        Error(Box::new(Inner {
            code: Self::CODE,
            messages: Vec::new(),
            error: None,
            attributes: HashMap::new(),
            fields: HashMap::new(),
        }))
    }
    fn with_message<S: Into<Cow<'static, str>>>(message: S) -> Error {
        let mut err = Self::build();
        err.0.messages.push(message.into());
        err
    }
    fn with_source<E: StdError + Send + Sync + 'static>(source: E) -> Error {
        let mut err = Self::build();
        err.0.error = Some(Box::new(source));
        err
    }
}

/// A typed field that can be attached to an [`Error`].
pub trait Field {
    const NAME: &'static str;
    type Value: Send + Sync + 'static;
}

/// Extension adding error context to `Result`.
pub trait ResultExt<T> {
    fn context<S: Into<Cow<'static, str>>>(self, message: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<Cow<'static, str>>>(self, message: S) -> Result<T, Error> {
        self.map_err(|e| e.context(message))
    }
}
