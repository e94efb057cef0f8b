//! Driver-independent pieces of the query pipeline: compilation
//! options, cardinality enforcement, argument encoding and result
//! shaping.

use bytes::{Bytes, BytesMut};

use gelx_errors::{
    Error, ErrorKind, InterfaceError, MissingArgumentError, NoDataError,
    ParameterTypeMismatchError, ProtocolOutOfOrderError, QueryArgumentError, UnknownArgumentError,
};
use gelx_protocol::codec::Codec;
use gelx_protocol::common::{Capabilities, Cardinality, CompilationOptions, InputLanguage, IoFormat};
use gelx_protocol::errors::EncodeError;
use gelx_protocol::query_arg::Arguments;
use gelx_protocol::server_message::ErrorResponse;
use gelx_protocol::value::Value;

use crate::cache::Fingerprint;

/// The per-call request description, fixed at call time.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub query: String,
    pub output_format: IoFormat,
    pub expect_one: bool,
    pub required_one: bool,
    pub implicit_limit: Option<u64>,
    pub inject_typenames: bool,
    pub inject_typeids: bool,
    pub capabilities: Capabilities,
    pub input_language: InputLanguage,
}

impl QueryParams {
    pub fn new(query: impl Into<String>, output_format: IoFormat) -> QueryParams {
        QueryParams {
            query: query.into(),
            output_format,
            expect_one: false,
            required_one: false,
            implicit_limit: None,
            inject_typenames: false,
            inject_typeids: false,
            capabilities: Capabilities::ALL,
            input_language: InputLanguage::EdgeQL,
        }
    }

    pub fn expect_one(mut self, required: bool) -> QueryParams {
        self.expect_one = true;
        self.required_one = required;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            query: self.query.clone(),
            output_format: self.output_format,
            implicit_limit: self.implicit_limit,
            inject_typenames: self.inject_typenames,
            inject_typeids: self.inject_typeids,
            expect_one: self.expect_one,
        }
    }

    pub fn compilation_options(&self) -> CompilationOptions {
        CompilationOptions {
            implicit_limit: self.implicit_limit,
            implicit_typenames: self.inject_typenames,
            implicit_typeids: self.inject_typeids,
            allow_capabilities: self.capabilities,
            explicit_objectids: true,
            io_format: self.output_format,
            expected_cardinality: if self.expect_one {
                Cardinality::AtMostOne
            } else {
                Cardinality::Many
            },
            input_language: self.input_language,
        }
    }
}

/// Refuse a single-row request for a statement that returns nothing,
/// before anything is put on the wire.
pub fn check_cardinality(params: &QueryParams, cardinality: Cardinality) -> Result<(), Error> {
    if params.expect_one && params.required_one && cardinality == Cardinality::NoResult {
        return Err(InterfaceError::with_message(
            "the statement does not return any data and cannot be executed as a single query",
        ));
    }
    Ok(())
}

/// Encode the argument block, mapping shape mismatches to the argument
/// error hierarchy.
pub fn encode_arguments(in_codec: &dyn Codec, args: &Arguments) -> Result<Bytes, Error> {
    let mut buf = BytesMut::new();
    in_codec
        .encode_args(&mut buf, args)
        .map_err(|e| match &e {
            EncodeError::MissingArgument { .. } => MissingArgumentError::with_source(e),
            EncodeError::UnknownInputField { .. } => UnknownArgumentError::with_source(e),
            _ => QueryArgumentError::with_source(e),
        })?;
    Ok(buf.freeze())
}

/// Turn a captured server error into the error the caller should see.
///
/// A parameter type mismatch is replaced by re-encoding the arguments
/// against the (freshly corrected) input codec, so the caller learns
/// which argument is wrong instead of seeing the server's echo.
pub fn resolve_error(
    response: ErrorResponse,
    in_codec: &dyn Codec,
    args: &Arguments,
    query: &str,
) -> Error {
    let error: Error = response.into();
    let error = if error.is::<ParameterTypeMismatchError>() {
        match encode_arguments(in_codec, args) {
            Ok(_) => error,
            Err(client_side) => client_side,
        }
    } else {
        error
    };
    error.set::<gelx_errors::QueryText>(query)
}

/// Collapse a row list to the single-row result forms.
pub fn single_row(rows: Vec<Value>, required: bool) -> Result<Option<Value>, Error> {
    match rows.into_iter().next() {
        Some(row) => Ok(Some(row)),
        None if required => Err(NoDataError::with_message(
            "the query did not return any data",
        )),
        None => Ok(None),
    }
}

/// The whole-result JSON form: rows arrive as one array string.
pub fn json_result(rows: Vec<Value>) -> Result<String, Error> {
    match rows.into_iter().next() {
        Some(Value::Str(json)) => Ok(json),
        Some(other) => Err(ProtocolOutOfOrderError::with_message(format!(
            "expected a JSON row, got {}",
            other.kind()
        ))),
        None => Ok("[]".to_string()),
    }
}

/// The single-row JSON form: zero rows become the literal `null`.
pub fn single_json(rows: Vec<Value>, required: bool) -> Result<String, Error> {
    match rows.into_iter().next() {
        Some(Value::Str(json)) => Ok(json),
        Some(other) => Err(ProtocolOutOfOrderError::with_message(format!(
            "expected a JSON row, got {}",
            other.kind()
        ))),
        None if required => Err(NoDataError::with_message(
            "the query did not return any data",
        )),
        None => Ok("null".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gelx_protocol::codec::{scalar_codec, STD_INT64};

    #[test]
    fn required_single_on_no_result_fails_before_wire() {
        let params = QueryParams::new("create type X", IoFormat::Binary).expect_one(true);
        let err = check_cardinality(&params, Cardinality::NoResult).unwrap_err();
        assert!(err.is::<InterfaceError>());
        // an optional single result is allowed through
        let optional = QueryParams::new("create type X", IoFormat::Binary).expect_one(false);
        assert!(check_cardinality(&optional, Cardinality::NoResult).is_ok());
        assert!(check_cardinality(&params, Cardinality::AtMostOne).is_ok());
    }

    #[test]
    fn empty_results_shape_by_format() {
        assert_eq!(single_row(vec![], false).unwrap(), None);
        assert!(single_row(vec![], true).unwrap_err().is::<NoDataError>());
        assert_eq!(json_result(vec![]).unwrap(), "[]");
        assert_eq!(single_json(vec![], false).unwrap(), "null");
        assert!(single_json(vec![], true).unwrap_err().is::<NoDataError>());
    }

    #[test]
    fn argument_errors_are_typed() {
        // a scalar codec cannot take arguments at all
        let codec = scalar_codec(&STD_INT64).unwrap();
        let err = encode_arguments(&*codec, &Arguments::new()).unwrap_err();
        assert!(err.is::<QueryArgumentError>());
    }

    #[test]
    fn fingerprint_tracks_query_shape() {
        let a = QueryParams::new("select 1", IoFormat::Binary).fingerprint();
        let b = QueryParams::new("select 1", IoFormat::Binary).fingerprint();
        let c = QueryParams::new("select 1", IoFormat::Json).fingerprint();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
