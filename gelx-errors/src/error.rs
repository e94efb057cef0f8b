use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;

use crate::kinds::{error_name, tag_check};
use crate::traits::{ErrorKind, Field};

/// A marker bit attached to some error classes.
///
/// Tags classify errors across the hierarchy: an error may be retryable
/// (`SHOULD_RETRY`) or may indicate that the connection must be
/// re-established (`SHOULD_RECONNECT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub(crate) bit: u32,
}

pub(crate) struct Inner {
    pub(crate) code: u32,
    pub(crate) messages: Vec<Cow<'static, str>>,
    pub(crate) error: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) attributes: HashMap<u16, Bytes>,
    pub(crate) fields: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

/// Any error the client can surface, including errors forwarded from the
/// server.
pub struct Error(pub(crate) Box<Inner>);

impl Error {
    pub fn code(&self) -> u32 {
        self.0.code
    }
    pub fn kind_name(&self) -> &'static str {
        error_name(self.0.code)
    }
    /// Check whether this error belongs to the class `K` (or any of its
    /// subclasses).
    pub fn is<K: ErrorKind>(&self) -> bool {
        self.0.code & K::code_mask() == K::CODE
    }
    pub fn has_tag(&self, tag: Tag) -> bool {
        tag_check(self.0.code, tag.bit)
    }
    pub fn initial_message(&self) -> Option<&str> {
        self.0.messages.first().map(|m| &m[..])
    }
    pub fn context<S: Into<Cow<'static, str>>>(mut self, message: S) -> Error {
        self.0.messages.push(message.into());
        self
    }
    /// Attach a typed field, returning the modified error.
    pub fn set<F: Field>(mut self, value: impl Into<F::Value>) -> Error {
        self.0.fields.insert(F::NAME, Box::new(value.into()));
        self
    }
    pub fn get<F: Field>(&self) -> Option<&F::Value> {
        self.0
            .fields
            .get(F::NAME)
            .and_then(|bx| bx.downcast_ref::<F::Value>())
    }
    /// Attach the raw attribute map of an `ErrorResponse`.
    pub fn with_attributes(mut self, attributes: HashMap<u16, Bytes>) -> Error {
        self.0.attributes = attributes;
        self
    }
    pub fn attribute(&self, code: u16) -> Option<&Bytes> {
        self.0.attributes.get(&code)
    }
    pub fn hint(&self) -> Option<&str> {
        self.attribute(crate::fields_map::HINT)
            .and_then(|b| std::str::from_utf8(b).ok())
    }
    pub fn details(&self) -> Option<&str> {
        self.attribute(crate::fields_map::DETAILS)
            .and_then(|b| std::str::from_utf8(b).ok())
    }
    /// Construct an error from a server error code and message, applying
    /// the legacy code remapping of old servers.
    pub fn from_code(code: u32, message: impl Into<Cow<'static, str>>) -> Error {
        let code = remap_legacy_code(code);
        Error(Box::new(Inner {
            code,
            messages: vec![message.into()],
            error: None,
            attributes: HashMap::new(),
            fields: HashMap::new(),
        }))
    }
    pub fn refine<K: ErrorKind>(mut self) -> Error {
        self.0.code = K::CODE;
        self
    }
}

/// Old servers report transaction serialization failures under codes that
/// were later moved below `TransactionConflictError`.
pub(crate) fn remap_legacy_code(code: u32) -> u32 {
    match code {
        0x_05_03_00_01 => 0x_05_03_01_01,
        0x_05_03_00_02 => 0x_05_03_01_02,
        _ => code,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind_name())?;
        for msg in self.0.messages.iter().rev() {
            write!(f, ": {msg}")?;
        }
        if let Some(src) = &self.0.error {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut dbg = f.debug_struct(self.kind_name());
        for (i, msg) in self.0.messages.iter().enumerate() {
            if i == 0 {
                dbg.field("message", msg);
            } else {
                dbg.field("context", msg);
            }
        }
        if let Some(src) = &self.0.error {
            dbg.field("source", src);
        }
        dbg.finish()
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.error.as_deref().map(|e| e as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::*;

    #[test]
    fn hierarchy_prefix_match() {
        let err = TransactionSerializationError::with_message("conflict");
        assert!(err.is::<TransactionSerializationError>());
        assert!(err.is::<TransactionConflictError>());
        assert!(err.is::<TransactionError>());
        assert!(err.is::<ExecutionError>());
        assert!(!err.is::<ClientError>());
        assert!(!err.is::<TransactionDeadlockError>());
    }

    #[test]
    fn retry_tags() {
        assert!(TransactionConflictError::build().has_tag(SHOULD_RETRY));
        assert!(TransactionSerializationError::build().has_tag(SHOULD_RETRY));
        assert!(ClientConnectionTimeoutError::build().has_tag(SHOULD_RETRY));
        assert!(ClientConnectionClosedError::build().has_tag(SHOULD_RECONNECT));
        assert!(!InterfaceError::build().has_tag(SHOULD_RETRY));
    }

    #[test]
    fn legacy_remap() {
        let err = Error::from_code(0x_05_03_00_01, "serialization failure");
        assert!(err.is::<TransactionSerializationError>());
        let err = Error::from_code(0x_05_03_00_02, "deadlock detected");
        assert!(err.is::<TransactionDeadlockError>());
    }

    #[test]
    fn display_includes_context() {
        let err = NoDataError::with_message("query returned no data")
            .context("while fetching exactly one row");
        let text = err.to_string();
        assert!(text.starts_with("NoDataError"));
        assert!(text.contains("while fetching exactly one row"));
        assert!(text.contains("query returned no data"));
    }
}
