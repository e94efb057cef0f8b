/*!
Codecs turn wire payloads into [`Value`]s and back.

Every codec carries the 128-bit id of the type it serves; that id is its
identity in the [`CodecRegistry`](crate::registry::CodecRegistry).
Composite codecs hold shared handles to their element codecs, so a codec
stays alive as long as any registry entry or in-flight request points at
it.
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::{uuid, Uuid};

use crate::descriptors::{Descriptor, TypePos, Typedesc};
use crate::errors::{self, invalid_value, CodecError, DecodeError, EncodeError};
use crate::model::vector::{f16_bits_to_f32, f32_to_f16_bits};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration, SparseVector,
};
use crate::common::Cardinality;
use crate::query_arg::Arguments;
use crate::registry::{CodecRegistry, ScalarOverride};
use crate::shape::{NamedTupleShape, ObjectShape, ShapeElement};
use crate::value::{EnumValue, MultiRange, Range, SparseObject, Value};

pub const STD_UUID: Uuid = uuid!("00000000-0000-0000-0000-000000000100");
pub const STD_STR: Uuid = uuid!("00000000-0000-0000-0000-000000000101");
pub const STD_BYTES: Uuid = uuid!("00000000-0000-0000-0000-000000000102");
pub const STD_INT16: Uuid = uuid!("00000000-0000-0000-0000-000000000103");
pub const STD_INT32: Uuid = uuid!("00000000-0000-0000-0000-000000000104");
pub const STD_INT64: Uuid = uuid!("00000000-0000-0000-0000-000000000105");
pub const STD_FLOAT32: Uuid = uuid!("00000000-0000-0000-0000-000000000106");
pub const STD_FLOAT64: Uuid = uuid!("00000000-0000-0000-0000-000000000107");
pub const STD_DECIMAL: Uuid = uuid!("00000000-0000-0000-0000-000000000108");
pub const STD_BOOL: Uuid = uuid!("00000000-0000-0000-0000-000000000109");
pub const STD_DATETIME: Uuid = uuid!("00000000-0000-0000-0000-00000000010a");
pub const CAL_LOCAL_DATETIME: Uuid = uuid!("00000000-0000-0000-0000-00000000010b");
pub const CAL_LOCAL_DATE: Uuid = uuid!("00000000-0000-0000-0000-00000000010c");
pub const CAL_LOCAL_TIME: Uuid = uuid!("00000000-0000-0000-0000-00000000010d");
pub const STD_DURATION: Uuid = uuid!("00000000-0000-0000-0000-00000000010e");
pub const STD_JSON: Uuid = uuid!("00000000-0000-0000-0000-00000000010f");
pub const STD_BIGINT: Uuid = uuid!("00000000-0000-0000-0000-000000000110");
pub const CAL_RELATIVE_DURATION: Uuid = uuid!("00000000-0000-0000-0000-000000000111");
pub const CAL_DATE_DURATION: Uuid = uuid!("00000000-0000-0000-0000-000000000112");
pub const CFG_MEMORY: Uuid = uuid!("00000000-0000-0000-0000-000000000130");
pub const PGVECTOR_VECTOR: Uuid = uuid!("9565dd88-04f5-11ee-a691-0b6ebe179825");

/// The sentinel id used whenever the input type is empty.
pub const EMPTY_TUPLE_ID: Uuid = uuid!("00000000-0000-0000-0000-0000000000ff");
/// Sixteen zero bytes: the id of the null codec.
pub const NULL_ID: Uuid = uuid!("00000000-0000-0000-0000-000000000000");

pub trait Codec: fmt::Debug + Send + Sync + 'static {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError>;
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError>;
    /// The id this codec is registered under.
    fn type_id(&self) -> Uuid;
    /// Encode the argument block of an Execute message.
    ///
    /// Only input codecs (shapes and the empty-input sentinels) support
    /// this; for anything else arguments are a type error.
    fn encode_args(&self, _buf: &mut BytesMut, args: &Arguments) -> Result<(), EncodeError> {
        let _ = args;
        errors::ObjectShapeMismatch.fail()
    }
}

#[derive(Debug)]
pub struct NullCodec;

#[derive(Debug)]
pub struct EmptyTupleCodec;

macro_rules! base_scalars {
    ($( (struct $codec:ident, $id:ident), )*) => {
        $(
            #[derive(Debug)]
            pub struct $codec;

            impl $codec {
                pub const TYPE_ID: Uuid = $id;
            }
        )*

        /// Look up the base scalar codec for a well-known type id.
        pub fn scalar_codec(id: &Uuid) -> Result<Arc<dyn Codec>, CodecError> {
            match *id {
                $( $id => Ok(Arc::new($codec)), )*
                _ => errors::UndefinedBaseScalar { uuid: *id }.fail(),
            }
        }
    }
}

base_scalars![
    (struct UuidCodec, STD_UUID),
    (struct StrCodec, STD_STR),
    (struct BytesCodec, STD_BYTES),
    (struct Int16Codec, STD_INT16),
    (struct Int32Codec, STD_INT32),
    (struct Int64Codec, STD_INT64),
    (struct Float32Codec, STD_FLOAT32),
    (struct Float64Codec, STD_FLOAT64),
    (struct DecimalCodec, STD_DECIMAL),
    (struct BoolCodec, STD_BOOL),
    (struct DatetimeCodec, STD_DATETIME),
    (struct LocalDatetimeCodec, CAL_LOCAL_DATETIME),
    (struct LocalDateCodec, CAL_LOCAL_DATE),
    (struct LocalTimeCodec, CAL_LOCAL_TIME),
    (struct DurationCodec, STD_DURATION),
    (struct JsonCodec, STD_JSON),
    (struct BigIntCodec, STD_BIGINT),
    (struct RelativeDurationCodec, CAL_RELATIVE_DURATION),
    (struct DateDurationCodec, CAL_DATE_DURATION),
    (struct ConfigMemoryCodec, CFG_MEMORY),
    (struct VectorCodec, PGVECTOR_VECTOR),
];

/// Extension scalars are recognized by name: protocol >= 2.0 always names
/// scalar descriptors, so their ids need not be hard-coded.
pub fn scalar_codec_by_name(name: &str, id: Uuid) -> Option<Arc<dyn Codec>> {
    match name {
        "ext::pgvector::vector" => Some(Arc::new(VectorCodec)),
        "ext::pgvector::halfvec" => Some(Arc::new(HalfVectorCodec { id })),
        "ext::pgvector::sparsevec" => Some(Arc::new(SparseVectorCodec { id })),
        "ext::postgis::geometry"
        | "ext::postgis::geography"
        | "ext::postgis::box2d"
        | "ext::postgis::box3d" => Some(Arc::new(GeometryCodec { id })),
        _ => None,
    }
}

#[derive(Debug)]
pub struct HalfVectorCodec {
    id: Uuid,
}

#[derive(Debug)]
pub struct SparseVectorCodec {
    id: Uuid,
}

#[derive(Debug)]
pub struct GeometryCodec {
    id: Uuid,
}

/// A user-defined scalar deriving its representation from a base scalar.
#[derive(Debug)]
pub struct DerivedScalarCodec {
    id: Uuid,
    name: Option<String>,
    base: Arc<dyn Codec>,
}

/// Wraps a base scalar with user-registered value adaptors.
pub struct OverrideCodec {
    id: Uuid,
    base: Arc<dyn Codec>,
    hooks: Arc<ScalarOverride>,
}

#[derive(Debug)]
pub struct ArrayCodec {
    id: Uuid,
    element: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct SetCodec {
    id: Uuid,
    element: Arc<dyn Codec>,
    /// Sets of arrays arrive in the nested single-element-record envelope.
    element_is_array: bool,
}

#[derive(Debug)]
pub struct TupleCodec {
    id: Uuid,
    elements: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct NamedTupleCodec {
    id: Uuid,
    shape: NamedTupleShape,
    elements: Vec<Arc<dyn Codec>>,
}

/// SQL result rows: the tuple wire shape with nullable, named fields.
#[derive(Debug)]
pub struct SqlRowCodec {
    id: Uuid,
    shape: NamedTupleShape,
    elements: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct ObjectCodec {
    id: Uuid,
    shape: ObjectShape,
    fields: Vec<Arc<dyn Codec>>,
}

/// Input shapes: a sparse field list keyed by position.
#[derive(Debug)]
pub struct SparseObjectCodec {
    id: Uuid,
    shape: ObjectShape,
    fields: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct EnumCodec {
    id: Uuid,
    members: Vec<Arc<str>>,
    index_by_label: HashMap<Arc<str>, usize>,
}

#[derive(Debug)]
pub struct RangeCodec {
    id: Uuid,
    element: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct MultiRangeCodec {
    id: Uuid,
    element: Arc<dyn Codec>,
}

mod range_flags {
    pub const EMPTY: u8 = 0x01;
    pub const LB_INC: u8 = 0x02;
    pub const UB_INC: u8 = 0x04;
    pub const LB_INF: u8 = 0x08;
    pub const UB_INF: u8 = 0x10;
    pub const ALL: u8 = EMPTY | LB_INC | UB_INC | LB_INF | UB_INF;
}

fn check_scalar_len(buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    ensure!(buf.len() >= expected, errors::Underflow);
    ensure!(buf.len() <= expected, errors::ExtraData);
    Ok(())
}

/// Write one length-prefixed element through its codec.
fn encode_element(
    buf: &mut BytesMut,
    codec: &dyn Codec,
    value: &Value,
) -> Result<(), EncodeError> {
    if let Value::Nothing = value {
        buf.reserve(4);
        buf.put_i32(-1);
        return Ok(());
    }
    buf.reserve(4);
    let base = buf.len();
    buf.put_u32(0);
    codec.encode(buf, value)?;
    let len = i32::try_from(buf.len() - base - 4)
        .ok()
        .context(errors::ElementTooLong)?;
    buf[base..base + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Read one length-prefixed element; `-1` means absent.
fn read_element<'a>(buf: &mut &'a [u8]) -> Result<Option<&'a [u8]>, DecodeError> {
    ensure!(buf.remaining() >= 4, errors::Underflow);
    let len = buf.get_i32();
    if len < 0 {
        ensure!(len == -1, errors::InvalidMarker);
        return Ok(None);
    }
    let len = len as usize;
    ensure!(buf.remaining() >= len, errors::Underflow);
    let (element, rest) = buf.split_at(len);
    *buf = rest;
    Ok(Some(element))
}

impl Codec for NullCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 0)?;
        Ok(Value::Nothing)
    }
    fn encode(&self, _buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Nothing => Ok(()),
            _ => Err(invalid_value("null", value)),
        }
    }
    fn type_id(&self) -> Uuid {
        NULL_ID
    }
    fn encode_args(&self, _buf: &mut BytesMut, args: &Arguments) -> Result<(), EncodeError> {
        if !args.is_empty() {
            return errors::ObjectShapeMismatch.fail();
        }
        Ok(())
    }
}

impl Codec for EmptyTupleCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 4, errors::Underflow);
        let count = cur.get_i32();
        ensure!(count == 0, errors::TupleSizeMismatch);
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::empty_tuple())
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Tuple(items) if items.is_empty() => {
                buf.reserve(4);
                buf.put_i32(0);
                Ok(())
            }
            _ => Err(invalid_value("empty tuple", value)),
        }
    }
    fn type_id(&self) -> Uuid {
        EMPTY_TUPLE_ID
    }
    fn encode_args(&self, buf: &mut BytesMut, args: &Arguments) -> Result<(), EncodeError> {
        if !args.is_empty() {
            return errors::ObjectShapeMismatch.fail();
        }
        buf.reserve(4);
        buf.put_i32(0);
        Ok(())
    }
}

impl Codec for UuidCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(buf);
        Ok(Value::Uuid(Uuid::from_bytes(bytes)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Uuid(inner) = value else {
            return Err(invalid_value("std::uuid", value));
        };
        buf.extend_from_slice(inner.as_bytes());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for StrCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        Ok(Value::Str(text.to_owned()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Str(inner) = value else {
            return Err(invalid_value("std::str", value));
        };
        buf.extend_from_slice(inner.as_bytes());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for BytesCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        Ok(Value::Bytes(Bytes::copy_from_slice(buf)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Bytes(inner) = value else {
            return Err(invalid_value("std::bytes", value));
        };
        buf.extend_from_slice(inner);
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

macro_rules! fixed_scalar_impl {
    ($codec:ident, $variant:ident, $name:expr, $len:expr, $get:ident, $put:ident) => {
        impl Codec for $codec {
            fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
                check_scalar_len(buf, $len)?;
                let mut cur = buf;
                Ok(Value::$variant(cur.$get()))
            }
            fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
                let Value::$variant(inner) = value else {
                    return Err(invalid_value($name, value));
                };
                buf.reserve($len);
                buf.$put(*inner);
                Ok(())
            }
            fn type_id(&self) -> Uuid {
                Self::TYPE_ID
            }
        }
    };
}

fixed_scalar_impl!(Int16Codec, Int16, "std::int16", 2, get_i16, put_i16);
fixed_scalar_impl!(Int32Codec, Int32, "std::int32", 4, get_i32, put_i32);
fixed_scalar_impl!(Int64Codec, Int64, "std::int64", 8, get_i64, put_i64);
fixed_scalar_impl!(Float32Codec, Float32, "std::float32", 4, get_f32, put_f32);
fixed_scalar_impl!(Float64Codec, Float64, "std::float64", 8, get_f64, put_f64);

impl Codec for BoolCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 1)?;
        match buf[0] {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            val => errors::InvalidBool { val }.fail(),
        }
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Bool(inner) = value else {
            return Err(invalid_value("std::bool", value));
        };
        buf.put_u8(*inner as u8);
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for JsonCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        ensure!(!buf.is_empty(), errors::Underflow);
        ensure!(buf[0] == 1, errors::InvalidJsonFormat);
        let text = std::str::from_utf8(&buf[1..]).context(errors::InvalidUtf8)?;
        Ok(Value::Json(Json::new_unchecked(text.to_owned())))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Json(inner) = value else {
            return Err(invalid_value("std::json", value));
        };
        buf.reserve(1 + inner.len());
        buf.put_u8(1);
        buf.extend_from_slice(inner.as_bytes());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for DatetimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 8)?;
        let mut cur = buf;
        Ok(Value::Datetime(Datetime::from_postgres_micros(
            cur.get_i64(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Datetime(inner) = value else {
            return Err(invalid_value("std::datetime", value));
        };
        buf.put_i64(inner.postgres_micros());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for LocalDatetimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 8)?;
        let mut cur = buf;
        Ok(Value::LocalDatetime(LocalDatetime::from_postgres_micros(
            cur.get_i64(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::LocalDatetime(inner) = value else {
            return Err(invalid_value("cal::local_datetime", value));
        };
        buf.put_i64(inner.postgres_micros());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for LocalDateCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 4)?;
        let mut cur = buf;
        Ok(Value::LocalDate(LocalDate::from_postgres_days(
            cur.get_i32(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::LocalDate(inner) = value else {
            return Err(invalid_value("cal::local_date", value));
        };
        buf.put_i32(inner.postgres_days());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for LocalTimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 8)?;
        let mut cur = buf;
        let micros = cur.get_i64();
        let time = u64::try_from(micros)
            .ok()
            .and_then(|micros| LocalTime::from_micros(micros).ok())
            .context(errors::InvalidDate)?;
        Ok(Value::LocalTime(time))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::LocalTime(inner) = value else {
            return Err(invalid_value("cal::local_time", value));
        };
        buf.put_i64(inner.micros() as i64);
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for DurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 16)?;
        let mut cur = buf;
        let micros = cur.get_i64();
        let days = cur.get_i32();
        let months = cur.get_i32();
        ensure!(days == 0 && months == 0, errors::NonZeroDurationParts);
        Ok(Value::Duration(Duration::from_micros(micros)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Duration(inner) = value else {
            return Err(invalid_value("std::duration", value));
        };
        buf.reserve(16);
        buf.put_i64(inner.micros());
        buf.put_i32(0);
        buf.put_i32(0);
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for RelativeDurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 16)?;
        let mut cur = buf;
        let micros = cur.get_i64();
        let days = cur.get_i32();
        let months = cur.get_i32();
        Ok(Value::RelativeDuration(RelativeDuration::new(
            micros, days, months,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::RelativeDuration(inner) = value else {
            return Err(invalid_value("cal::relative_duration", value));
        };
        buf.reserve(16);
        buf.put_i64(inner.micros());
        buf.put_i32(inner.days());
        buf.put_i32(inner.months());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for DateDurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 16)?;
        let mut cur = buf;
        let micros = cur.get_i64();
        ensure!(micros == 0, errors::NonZeroDateDurationMicros);
        let days = cur.get_i32();
        let months = cur.get_i32();
        Ok(Value::DateDuration(DateDuration::new(days, months)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::DateDuration(inner) = value else {
            return Err(invalid_value("cal::date_duration", value));
        };
        buf.reserve(16);
        buf.put_i64(0);
        buf.put_i32(inner.days());
        buf.put_i32(inner.months());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

const BIGNUM_POS: u16 = 0x0000;
const BIGNUM_NEG: u16 = 0x4000;

fn decode_bignum_header(cur: &mut &[u8]) -> Result<(u16, i16, bool, u16), DecodeError> {
    ensure!(cur.remaining() >= 8, errors::Underflow);
    let ndigits = cur.get_u16();
    let weight = cur.get_i16();
    let negative = match cur.get_u16() {
        BIGNUM_POS => false,
        BIGNUM_NEG => true,
        _ => return errors::BadSign.fail(),
    };
    let dscale = cur.get_u16();
    Ok((ndigits, weight, negative, dscale))
}

impl Codec for BigIntCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        let (ndigits, weight, negative, dscale) = decode_bignum_header(&mut cur)?;
        ensure!(dscale == 0, errors::BadScale);
        check_scalar_len(cur, ndigits as usize * 2)?;
        let mut digits = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            digits.push(cur.get_u16());
        }
        Ok(Value::BigInt(
            BigInt {
                negative,
                weight,
                digits,
            }
            .normalize(),
        ))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::BigInt(inner) = value else {
            return Err(invalid_value("std::bigint", value));
        };
        let ndigits = u16::try_from(inner.digits.len())
            .ok()
            .context(errors::BigIntTooLong)?;
        buf.reserve(8 + ndigits as usize * 2);
        buf.put_u16(ndigits);
        buf.put_i16(inner.weight);
        buf.put_u16(if inner.negative { BIGNUM_NEG } else { BIGNUM_POS });
        buf.put_u16(0);
        for &digit in &inner.digits {
            buf.put_u16(digit);
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for DecimalCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        let (ndigits, weight, negative, dscale) = decode_bignum_header(&mut cur)?;
        check_scalar_len(cur, ndigits as usize * 2)?;
        let mut digits = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            digits.push(cur.get_u16());
        }
        Ok(Value::Decimal(
            Decimal {
                negative,
                weight,
                decimal_digits: dscale,
                digits,
            }
            .normalize(),
        ))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let inner = match value {
            Value::Decimal(inner) => inner.clone(),
            // integers are a valid decimal input
            Value::BigInt(inner) => Decimal::from(inner.clone()),
            Value::Int16(v) => Decimal::from(BigInt::from(*v as i64)),
            Value::Int32(v) => Decimal::from(BigInt::from(*v as i64)),
            Value::Int64(v) => Decimal::from(BigInt::from(*v)),
            _ => return Err(invalid_value("std::decimal", value)),
        };
        let ndigits = u16::try_from(inner.digits.len())
            .ok()
            .context(errors::DecimalTooLong)?;
        buf.reserve(8 + ndigits as usize * 2);
        buf.put_u16(ndigits);
        buf.put_i16(inner.weight);
        buf.put_u16(if inner.negative { BIGNUM_NEG } else { BIGNUM_POS });
        buf.put_u16(inner.decimal_digits);
        for &digit in &inner.digits {
            buf.put_u16(digit);
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for ConfigMemoryCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        check_scalar_len(buf, 8)?;
        let mut cur = buf;
        Ok(Value::ConfigMemory(ConfigMemory::new(cur.get_i64())))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::ConfigMemory(inner) = value else {
            return Err(invalid_value("cfg::memory", value));
        };
        buf.put_i64(inner.bytes());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

fn decode_vector_header(cur: &mut &[u8]) -> Result<usize, DecodeError> {
    ensure!(cur.remaining() >= 4, errors::Underflow);
    let count = cur.get_i16();
    let reserved = cur.get_i16();
    ensure!(count >= 0, errors::InvalidVectorShape);
    ensure!(reserved == 0, errors::NonZeroReservedBytes);
    Ok(count as usize)
}

impl Codec for VectorCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        let count = decode_vector_header(&mut cur)?;
        check_scalar_len(cur, count * 4)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(cur.get_f32());
        }
        Ok(Value::Vector(values))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Vector(values) = value else {
            return Err(invalid_value("ext::pgvector::vector", value));
        };
        let count = i16::try_from(values.len())
            .ok()
            .context(errors::VectorTooLong)?;
        buf.reserve(4 + values.len() * 4);
        buf.put_i16(count);
        buf.put_i16(0);
        for &item in values {
            buf.put_f32(item);
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        Self::TYPE_ID
    }
}

impl Codec for HalfVectorCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        let count = decode_vector_header(&mut cur)?;
        check_scalar_len(cur, count * 2)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(f16_bits_to_f32(cur.get_u16()));
        }
        Ok(Value::Vector(values))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Vector(values) = value else {
            return Err(invalid_value("ext::pgvector::halfvec", value));
        };
        let count = i16::try_from(values.len())
            .ok()
            .context(errors::VectorTooLong)?;
        buf.reserve(4 + values.len() * 2);
        buf.put_i16(count);
        buf.put_i16(0);
        for &item in values {
            let bits = f32_to_f16_bits(item).map_err(|_| errors::OutOfRange.build())?;
            buf.put_u16(bits);
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for SparseVectorCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 12, errors::Underflow);
        let dim = cur.get_i32();
        let nnz = cur.get_i32();
        let reserved = cur.get_i32();
        ensure!(reserved == 0, errors::NonZeroReservedBytes);
        ensure!(
            dim >= 0 && nnz >= 0 && nnz <= dim,
            errors::InvalidVectorShape
        );
        check_scalar_len(cur, nnz as usize * 8)?;
        let mut indices = Vec::with_capacity(nnz as usize);
        for _ in 0..nnz {
            let index = cur.get_i32();
            ensure!(index >= 0 && index < dim, errors::InvalidVectorShape);
            indices.push(index);
        }
        let mut values = Vec::with_capacity(nnz as usize);
        for _ in 0..nnz {
            values.push(cur.get_f32());
        }
        Ok(Value::SparseVector(SparseVector::from_parts(
            dim, indices, values,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::SparseVector(inner) = value else {
            return Err(invalid_value("ext::pgvector::sparsevec", value));
        };
        let nnz = i32::try_from(inner.indices.len())
            .ok()
            .context(errors::VectorTooLong)?;
        buf.reserve(12 + inner.indices.len() * 8);
        buf.put_i32(inner.dim);
        buf.put_i32(nnz);
        buf.put_i32(0);
        for &index in &inner.indices {
            buf.put_i32(index);
        }
        for &item in &inner.values {
            ensure!(item != 0.0, errors::ZeroSparseElement);
            buf.put_f32(item);
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for GeometryCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        Ok(Value::Geometry(Bytes::copy_from_slice(buf)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Geometry(inner) = value else {
            return Err(invalid_value("ext::postgis::geometry", value));
        };
        buf.extend_from_slice(inner);
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl DerivedScalarCodec {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Codec for DerivedScalarCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        self.base.decode(buf)
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        self.base.encode(buf, value)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Debug for OverrideCodec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OverrideCodec")
            .field("id", &self.id)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl Codec for OverrideCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let value = self.base.decode(buf)?;
        (self.hooks.decode)(value)
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let adapted = (self.hooks.encode)(value)?;
        self.base.encode(buf, &adapted)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

fn decode_array_envelope<'a>(
    buf: &'a [u8],
) -> Result<Option<(usize, &'a [u8])>, DecodeError> {
    let mut cur = buf;
    ensure!(cur.remaining() >= 12, errors::Underflow);
    let ndims = cur.get_i32();
    let _flags = cur.get_i32();
    let _reserved = cur.get_i32();
    if ndims == 0 {
        ensure!(cur.remaining() == 0, errors::ExtraData);
        return Ok(None);
    }
    ensure!(ndims == 1, errors::InvalidArrayShape);
    ensure!(cur.remaining() >= 8, errors::Underflow);
    let dim_len = cur.get_i32();
    let _lower = cur.get_i32();
    ensure!(dim_len >= 0, errors::InvalidArrayShape);
    Ok(Some((dim_len as usize, cur)))
}

fn encode_array_envelope(
    buf: &mut BytesMut,
    items: &[Value],
    element: &dyn Codec,
) -> Result<(), EncodeError> {
    let dim_len = i32::try_from(items.len())
        .ok()
        .context(errors::ArrayTooLong)?;
    buf.reserve(20);
    buf.put_i32(1);
    buf.put_i32(0);
    buf.put_i32(0);
    buf.put_i32(dim_len);
    buf.put_i32(1);
    for item in items {
        encode_element(buf, element, item)?;
    }
    Ok(())
}

impl Codec for ArrayCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let Some((dim_len, mut cur)) = decode_array_envelope(buf)? else {
            return Ok(Value::Array(Vec::new()));
        };
        let mut items = Vec::with_capacity(dim_len);
        for _ in 0..dim_len {
            match read_element(&mut cur)? {
                Some(element) => items.push(self.element.decode(element)?),
                None => items.push(Value::Nothing),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Array(items))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        // strings, bytes and mappings are not mistakable for arrays here:
        // only the Array variant is accepted
        let Value::Array(items) = value else {
            return Err(invalid_value("array", value));
        };
        encode_array_envelope(buf, items, &*self.element)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for SetCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let Some((dim_len, mut cur)) = decode_array_envelope(buf)? else {
            return Ok(Value::Set(Vec::new()));
        };
        let mut items = Vec::with_capacity(dim_len);
        for _ in 0..dim_len {
            let element = read_element(&mut cur)?.context(errors::InvalidSetShape)?;
            if self.element_is_array {
                // sets of arrays wrap each array into a one-element record
                let mut envelope = element;
                ensure!(envelope.remaining() >= 4, errors::Underflow);
                let count = envelope.get_i32();
                ensure!(count == 1, errors::InvalidSetShape);
                ensure!(envelope.remaining() >= 4, errors::Underflow);
                let _reserved = envelope.get_i32();
                let inner = read_element(&mut envelope)?.context(errors::InvalidSetShape)?;
                ensure!(envelope.remaining() == 0, errors::ExtraData);
                items.push(self.element.decode(inner)?);
            } else {
                items.push(self.element.decode(element)?);
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Set(items))
    }
    fn encode(&self, _buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        // sets cannot appear in argument position
        Err(invalid_value("set", value))
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

fn decode_tuple_header(cur: &mut &[u8], expected: usize) -> Result<(), DecodeError> {
    ensure!(cur.remaining() >= 4, errors::Underflow);
    let count = cur.get_i32();
    ensure!(
        count >= 0 && count as usize == expected,
        errors::TupleSizeMismatch
    );
    Ok(())
}

fn read_tuple_element<'a>(cur: &mut &'a [u8]) -> Result<Option<&'a [u8]>, DecodeError> {
    ensure!(cur.remaining() >= 4, errors::Underflow);
    let _reserved = cur.get_i32();
    read_element(cur)
}

impl Codec for TupleCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        decode_tuple_header(&mut cur, self.elements.len())?;
        let mut items = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match read_tuple_element(&mut cur)? {
                Some(data) => items.push(element.decode(data)?),
                None => items.push(Value::Nothing),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Tuple(items))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Tuple(items) = value else {
            return Err(invalid_value("tuple", value));
        };
        ensure!(
            items.len() == self.elements.len(),
            errors::TupleShapeMismatch
        );
        encode_tuple_fields(buf, &self.elements, items)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

fn encode_tuple_fields(
    buf: &mut BytesMut,
    codecs: &[Arc<dyn Codec>],
    items: &[Value],
) -> Result<(), EncodeError> {
    buf.reserve(4 + items.len() * 8);
    buf.put_u32(items.len() as u32);
    for (codec, item) in codecs.iter().zip(items) {
        buf.put_u32(0);
        encode_element(buf, &**codec, item)?;
    }
    Ok(())
}

impl Codec for NamedTupleCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        decode_tuple_header(&mut cur, self.elements.len())?;
        let mut fields = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match read_tuple_element(&mut cur)? {
                Some(data) => fields.push(element.decode(data)?),
                None => fields.push(Value::Nothing),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::NamedTuple {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        // positional tuples are accepted as well as named ones
        let fields = match value {
            Value::NamedTuple { shape, fields } => {
                ensure!(shape == &self.shape, errors::ObjectShapeMismatch);
                fields.clone()
            }
            Value::Tuple(items) => items.clone(),
            _ => return Err(invalid_value("named tuple", value)),
        };
        ensure!(
            fields.len() == self.elements.len(),
            errors::TupleShapeMismatch
        );
        encode_tuple_fields(buf, &self.elements, &fields)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for SqlRowCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        decode_tuple_header(&mut cur, self.elements.len())?;
        let mut fields = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match read_tuple_element(&mut cur)? {
                Some(data) => fields.push(Some(element.decode(data)?)),
                None => fields.push(None),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Record {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, _buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        // SQL rows are result-only
        Err(invalid_value("sql row", value))
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for ObjectCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 4, errors::Underflow);
        let count = cur.get_i32();
        ensure!(
            count >= 0 && count as usize == self.fields.len(),
            errors::ObjectSizeMismatch
        );
        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match read_tuple_element(&mut cur)? {
                Some(data) => fields.push(Some(field.decode(data)?)),
                None => fields.push(None),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Object {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, _buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        // output shapes cannot be sent back to the server
        Err(invalid_value("object", value))
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
    fn encode_args(&self, buf: &mut BytesMut, args: &Arguments) -> Result<(), EncodeError> {
        buf.reserve(4 + self.fields.len() * 8);
        buf.put_u32(
            u32::try_from(self.fields.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for (element, codec) in self.shape.elements().iter().zip(&self.fields) {
            buf.put_u32(0);
            match args.get(&element.name) {
                Some(value) => encode_element(buf, &**codec, value)?,
                None => {
                    let required = matches!(
                        element.cardinality,
                        Some(Cardinality::One) | Some(Cardinality::AtLeastOne)
                    );
                    if required {
                        return errors::MissingArgument {
                            name: element.name.clone(),
                        }
                        .fail();
                    }
                    buf.put_i32(-1);
                }
            }
        }
        Ok(())
    }
}

impl Codec for SparseObjectCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 4, errors::Underflow);
        let count = cur.get_i32();
        ensure!(count >= 0, errors::ObjectSizeMismatch);
        let mut fields = vec![None; self.fields.len()];
        for _ in 0..count {
            ensure!(cur.remaining() >= 4, errors::Underflow);
            let index = cur.get_i32() as usize;
            ensure!(
                index < self.fields.len(),
                errors::InvalidIndex { index }
            );
            match read_element(&mut cur)? {
                Some(data) => fields[index] = Some(Some(self.fields[index].decode(data)?)),
                None => fields[index] = Some(None),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::SparseObject(SparseObject {
            shape: self.shape.clone(),
            fields,
        }))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::SparseObject(inner) = value else {
            return Err(invalid_value("sparse object", value));
        };
        // map the value's fields onto this shape by name, so a sparse
        // object encoded for an older state descriptor still works
        let mut present = Vec::new();
        for (element, field) in inner.shape.elements().iter().zip(&inner.fields) {
            let Some(field) = field else { continue };
            let (index, _) = self.shape.lookup(&element.name).ok_or_else(|| {
                errors::UnknownInputField {
                    name: element.name.clone(),
                }
                .build()
            })?;
            present.push((index, field));
        }
        buf.reserve(4 + present.len() * 8);
        buf.put_u32(present.len() as u32);
        for (index, field) in present {
            buf.put_u32(index as u32);
            match field {
                Some(value) => encode_element(buf, &*self.fields[index], value)?,
                None => buf.put_i32(-1),
            }
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for EnumCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let label = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        let (label, index) = self
            .index_by_label
            .get_key_value(label)
            .ok_or_else(|| errors::ExtraEnumValue.build())?;
        Ok(Value::Enum(EnumValue::new(self.id, label.clone(), *index)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let label = match value {
            Value::Enum(inner) => {
                if inner.type_id() != self.id {
                    return Err(invalid_value("enum", value));
                }
                inner.label()
            }
            // bare strings are accepted if they name a member
            Value::Str(label) => label.as_str(),
            _ => return Err(invalid_value("enum", value)),
        };
        ensure!(
            self.index_by_label.contains_key(label),
            errors::MissingEnumValue
        );
        buf.extend_from_slice(label.as_bytes());
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

impl Codec for RangeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 1, errors::Underflow);
        let flags = cur.get_u8();
        ensure!(
            flags & !range_flags::ALL == 0,
            errors::InvalidRangeFlags { flags }
        );
        if flags & range_flags::EMPTY != 0 {
            ensure!(cur.remaining() == 0, errors::ExtraData);
            return Ok(Value::Range(Range::empty()));
        }
        let lower = if flags & range_flags::LB_INF == 0 {
            let data = read_element(&mut cur)?.context(errors::Underflow)?;
            Some(self.element.decode(data)?)
        } else {
            None
        };
        let upper = if flags & range_flags::UB_INF == 0 {
            let data = read_element(&mut cur)?.context(errors::Underflow)?;
            Some(self.element.decode(data)?)
        } else {
            None
        };
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::Range(Range::new(
            lower,
            upper,
            flags & range_flags::LB_INC != 0,
            flags & range_flags::UB_INC != 0,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Range(range) = value else {
            return Err(invalid_value("range", value));
        };
        encode_range(buf, range, &*self.element)
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

fn encode_range(buf: &mut BytesMut, range: &Range, element: &dyn Codec) -> Result<(), EncodeError> {
    if range.is_empty() {
        ensure!(
            range.lower().is_none() && range.upper().is_none(),
            errors::NonEmptyRange
        );
        buf.put_u8(range_flags::EMPTY);
        return Ok(());
    }
    let mut flags = 0;
    if range.inc_lower() {
        flags |= range_flags::LB_INC;
    }
    if range.inc_upper() {
        flags |= range_flags::UB_INC;
    }
    if range.lower().is_none() {
        flags |= range_flags::LB_INF;
    }
    if range.upper().is_none() {
        flags |= range_flags::UB_INF;
    }
    buf.put_u8(flags);
    if let Some(lower) = range.lower() {
        encode_element(buf, element, lower)?;
    }
    if let Some(upper) = range.upper() {
        encode_element(buf, element, upper)?;
    }
    Ok(())
}

impl Codec for MultiRangeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let mut cur = buf;
        ensure!(cur.remaining() >= 4, errors::Underflow);
        let count = cur.get_i32();
        ensure!(count >= 0, errors::InvalidArrayShape);
        let range_codec = RangeCodec {
            id: self.id,
            element: self.element.clone(),
        };
        let mut ranges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let data = read_element(&mut cur)?.context(errors::Underflow)?;
            match range_codec.decode(data)? {
                Value::Range(range) => ranges.push(range),
                _ => unreachable!("range codec yields ranges"),
            }
        }
        ensure!(cur.remaining() == 0, errors::ExtraData);
        Ok(Value::MultiRange(MultiRange(ranges)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::MultiRange(ranges) = value else {
            return Err(invalid_value("multi range", value));
        };
        buf.reserve(4);
        buf.put_u32(ranges.0.len() as u32);
        for range in &ranges.0 {
            let base = buf.len();
            buf.put_u32(0);
            encode_range(buf, range, &*self.element)?;
            let len = i32::try_from(buf.len() - base - 4)
                .ok()
                .context(errors::ElementTooLong)?;
            buf[base..base + 4].copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }
    fn type_id(&self) -> Uuid {
        self.id
    }
}

/// Builds the codec tree for one decoded descriptor blob.
///
/// Codecs are shared through the registry: a descriptor whose id is
/// already registered reuses the registered codec instead of building a
/// new one. A small build-scoped cache dedupes repeated positions within
/// one blob even when no registry is supplied.
pub struct CodecBuilder<'a> {
    typedesc: &'a Typedesc,
    registry: Option<&'a CodecRegistry>,
    built: lru::LruCache<Uuid, Arc<dyn Codec>>,
}

const BUILD_CACHE_SIZE: usize = 200;

impl<'a> CodecBuilder<'a> {
    pub fn new(typedesc: &'a Typedesc, registry: Option<&'a CodecRegistry>) -> CodecBuilder<'a> {
        CodecBuilder {
            typedesc,
            registry,
            built: lru::LruCache::new(BUILD_CACHE_SIZE.try_into().expect("non-zero")),
        }
    }

    pub fn build(&mut self, pos: TypePos) -> Result<Arc<dyn Codec>, DecodeError> {
        let descriptor = self.typedesc.get(pos)?;
        let id = descriptor.id().unwrap_or(NULL_ID);
        if let Some(codec) = self.built.get(&id) {
            return Ok(codec.clone());
        }
        if let Some(registry) = self.registry {
            if let Some(codec) = registry.lookup(&id) {
                self.built.put(id, codec.clone());
                return Ok(codec);
            }
        }
        let codec = self.build_new(descriptor)?;
        self.built.put(id, codec.clone());
        if let Some(registry) = self.registry {
            registry.store(id, codec.clone());
        }
        Ok(codec)
    }

    fn build_new(&mut self, descriptor: &Descriptor) -> Result<Arc<dyn Codec>, DecodeError> {
        use Descriptor as D;
        match descriptor {
            D::BaseScalar(base) => self.base_scalar(base.id),
            D::Scalar(scalar) => {
                let base = match scalar.base_type_pos {
                    Some(base_pos) => self.build(base_pos)?,
                    None => match scalar_codec(&scalar.id) {
                        Ok(codec) => return self.with_override(scalar.id, codec),
                        Err(lookup_err) => scalar
                            .name
                            .as_deref()
                            .and_then(|name| scalar_codec_by_name(name, scalar.id))
                            .ok_or_else(|| crate::errors::decode_error(lookup_err))?,
                    },
                };
                Ok(Arc::new(DerivedScalarCodec {
                    id: scalar.id,
                    name: scalar.name.clone().or_else(|| self.annotated_name(scalar.id)),
                    base,
                }))
            }
            D::Set(set) => {
                let element = self.build(set.type_pos)?;
                let element_is_array = matches!(*self.typedesc.get(set.type_pos)?, D::Array(..));
                Ok(Arc::new(SetCodec {
                    id: set.id,
                    element,
                    element_is_array,
                }))
            }
            D::ObjectShape(shape) => {
                let mut fields = Vec::with_capacity(shape.elements.len());
                let mut elements = Vec::with_capacity(shape.elements.len());
                for element in &shape.elements {
                    fields.push(self.build(element.type_pos)?);
                    elements.push(ShapeElement {
                        flag_implicit: element.flag_implicit,
                        flag_link_property: element.flag_link_property,
                        flag_link: element.flag_link,
                        cardinality: element.cardinality,
                        name: element.name.clone(),
                    });
                }
                let shape_table =
                    ObjectShape::new(elements).map_err(crate::errors::decode_error)?;
                Ok(Arc::new(ObjectCodec {
                    id: shape.id,
                    shape: shape_table,
                    fields,
                }))
            }
            D::InputShape(shape) => {
                let mut fields = Vec::with_capacity(shape.elements.len());
                let mut elements = Vec::with_capacity(shape.elements.len());
                for element in &shape.elements {
                    fields.push(self.build(element.type_pos)?);
                    elements.push(ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        cardinality: element.cardinality,
                        name: element.name.clone(),
                    });
                }
                let shape_table =
                    ObjectShape::new(elements).map_err(crate::errors::decode_error)?;
                Ok(Arc::new(SparseObjectCodec {
                    id: shape.id,
                    shape: shape_table,
                    fields,
                }))
            }
            D::Tuple(tuple) => {
                if tuple.element_types.is_empty() && tuple.id == EMPTY_TUPLE_ID {
                    return Ok(Arc::new(EmptyTupleCodec));
                }
                let elements = tuple
                    .element_types
                    .iter()
                    .map(|&pos| self.build(pos))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(TupleCodec {
                    id: tuple.id,
                    elements,
                }))
            }
            D::NamedTuple(tuple) => {
                let elements = tuple
                    .elements
                    .iter()
                    .map(|element| self.build(element.type_pos))
                    .collect::<Result<Vec<_>, _>>()?;
                let shape = NamedTupleShape::new(
                    tuple.elements.iter().map(|e| e.name.clone()).collect(),
                )
                .map_err(crate::errors::decode_error)?;
                Ok(Arc::new(NamedTupleCodec {
                    id: tuple.id,
                    shape,
                    elements,
                }))
            }
            D::SqlRow(row) => {
                let elements = row
                    .elements
                    .iter()
                    .map(|element| self.build(element.type_pos))
                    .collect::<Result<Vec<_>, _>>()?;
                let shape = NamedTupleShape::new(
                    row.elements.iter().map(|e| e.name.clone()).collect(),
                )
                .map_err(crate::errors::decode_error)?;
                Ok(Arc::new(SqlRowCodec {
                    id: row.id,
                    shape,
                    elements,
                }))
            }
            D::Array(array) => Ok(Arc::new(ArrayCodec {
                id: array.id,
                element: self.build(array.type_pos)?,
            })),
            D::Enumeration(enumeration) => {
                let members: Vec<Arc<str>> = enumeration
                    .members
                    .iter()
                    .map(|member| Arc::from(member.as_str()))
                    .collect();
                let index_by_label = members
                    .iter()
                    .enumerate()
                    .map(|(index, member)| (member.clone(), index))
                    .collect();
                Ok(Arc::new(EnumCodec {
                    id: enumeration.id,
                    members,
                    index_by_label,
                }))
            }
            D::Range(range) => Ok(Arc::new(RangeCodec {
                id: range.id,
                element: self.build(range.type_pos)?,
            })),
            D::MultiRange(range) => Ok(Arc::new(MultiRangeCodec {
                id: range.id,
                element: self.build(range.type_pos)?,
            })),
            // pure metadata in protocol >= 2.0
            D::Object(..) | D::Compound(..) => Ok(Arc::new(NullCodec)),
            D::TypeAnnotation(..) => Ok(Arc::new(NullCodec)),
        }
    }

    fn base_scalar(&self, id: Uuid) -> Result<Arc<dyn Codec>, DecodeError> {
        let codec = scalar_codec(&id).map_err(crate::errors::decode_error)?;
        self.with_override(id, codec)
    }

    fn with_override(
        &self,
        id: Uuid,
        codec: Arc<dyn Codec>,
    ) -> Result<Arc<dyn Codec>, DecodeError> {
        if let Some(hooks) = self.registry.and_then(|r| r.override_for(&id)) {
            return Ok(Arc::new(OverrideCodec {
                id,
                base: codec,
                hooks,
            }));
        }
        Ok(codec)
    }

    fn annotated_name(&self, id: Uuid) -> Option<String> {
        self.typedesc
            .annotations()
            .iter()
            .find(|a| a.id == Some(id))
            .and_then(|a| a.name.clone())
    }
}

impl Typedesc {
    /// Build the codec for the root type of this blob.
    pub fn build_codec(
        &self,
        registry: Option<&CodecRegistry>,
    ) -> Result<Arc<dyn Codec>, DecodeError> {
        let Some(root_pos) = self.root_pos() else {
            return Ok(Arc::new(NullCodec));
        };
        CodecBuilder::new(self, registry).build(root_pos)
    }
}

impl EnumCodec {
    pub fn members(&self) -> &[Arc<str>] {
        &self.members
    }
}
