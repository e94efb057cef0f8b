use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use gelx_protocol::codec::{
    scalar_codec, scalar_codec_by_name, Codec, EMPTY_TUPLE_ID, STD_BIGINT, STD_DECIMAL,
    STD_DURATION, CAL_DATE_DURATION, STD_INT32, STD_INT64, STD_STR, STD_UUID,
};
use gelx_protocol::descriptors::Typedesc;
use gelx_protocol::encoding::Input;
use gelx_protocol::features::ProtocolVersion;
use gelx_protocol::model::{BigInt, DateDuration, Duration};
use gelx_protocol::registry::CodecRegistry;
use gelx_protocol::value::{Range, SparseObject, Value};

mod base;

fn lp(mut body: Vec<u8>) -> Vec<u8> {
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.append(&mut body);
    out
}

fn lstr(s: &str) -> Vec<u8> {
    let mut out = (s.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(s.as_bytes());
    out
}

/// A protocol-2 scalar descriptor with no ancestors.
fn scalar_desc(id: Uuid, name: &str) -> Vec<u8> {
    let mut body = vec![0x03];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    lp(body)
}

fn derived_scalar_desc(id: Uuid, name: &str, ancestors: &[u16]) -> Vec<u8> {
    let mut body = vec![0x03];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&(ancestors.len() as u16).to_be_bytes());
    for &pos in ancestors {
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn array_desc(id: Uuid, name: &str, element_pos: u16) -> Vec<u8> {
    let mut body = vec![0x06];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&element_pos.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&(-1i32).to_be_bytes());
    lp(body)
}

fn set_desc(id: Uuid, element_pos: u16) -> Vec<u8> {
    let mut body = vec![0x00];
    body.extend_from_slice(id.as_bytes());
    body.extend_from_slice(&element_pos.to_be_bytes());
    lp(body)
}

fn range_desc(id: Uuid, name: &str, element_pos: u16) -> Vec<u8> {
    let mut body = vec![0x09];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&element_pos.to_be_bytes());
    lp(body)
}

fn multi_range_desc(id: Uuid, name: &str, element_pos: u16) -> Vec<u8> {
    let mut body = vec![0x0C];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&element_pos.to_be_bytes());
    lp(body)
}

fn enum_desc(id: Uuid, name: &str, members: &[&str]) -> Vec<u8> {
    let mut body = vec![0x07];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(members.len() as u16).to_be_bytes());
    for member in members {
        body.extend(lstr(member));
    }
    lp(body)
}

fn tuple_desc(id: Uuid, name: &str, element_positions: &[u16]) -> Vec<u8> {
    let mut body = vec![0x04];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(element_positions.len() as u16).to_be_bytes());
    for &pos in element_positions {
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn named_tuple_desc(id: Uuid, name: &str, elements: &[(&str, u16)]) -> Vec<u8> {
    let mut body = vec![0x05];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(elements.len() as u16).to_be_bytes());
    for (element_name, pos) in elements {
        body.extend(lstr(element_name));
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn sql_row_desc(id: Uuid, elements: &[(&str, u16)]) -> Vec<u8> {
    let mut body = vec![0x0D];
    body.extend_from_slice(id.as_bytes());
    body.extend_from_slice(&(elements.len() as u16).to_be_bytes());
    for (element_name, pos) in elements {
        body.extend(lstr(element_name));
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn input_shape_desc(id: Uuid, elements: &[(&str, u16)]) -> Vec<u8> {
    let mut body = vec![0x08];
    body.extend_from_slice(id.as_bytes());
    body.extend_from_slice(&(elements.len() as u16).to_be_bytes());
    for (element_name, pos) in elements {
        body.extend_from_slice(&0u32.to_be_bytes());
        body.push(0x6f); // at most one
        body.extend(lstr(element_name));
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn object_type_desc(id: Uuid, name: &str) -> Vec<u8> {
    let mut body = vec![0x0A];
    body.extend_from_slice(id.as_bytes());
    body.extend(lstr(name));
    body.push(1);
    lp(body)
}

/// (name, element position, is link, is link property)
fn shape_desc(id: Uuid, type_pos: u16, elements: &[(&str, u16, bool, bool)]) -> Vec<u8> {
    let mut body = vec![0x01];
    body.extend_from_slice(id.as_bytes());
    body.push(0);
    body.extend_from_slice(&type_pos.to_be_bytes());
    body.extend_from_slice(&(elements.len() as u16).to_be_bytes());
    for (element_name, pos, link, link_property) in elements {
        let mut flags = 0u32;
        if *link_property {
            flags |= 0b010;
        }
        if *link {
            flags |= 0b100;
        }
        body.extend_from_slice(&flags.to_be_bytes());
        body.push(0x41); // exactly one
        body.extend(lstr(element_name));
        body.extend_from_slice(&pos.to_be_bytes());
        body.extend_from_slice(&pos.to_be_bytes());
    }
    lp(body)
}

fn build(root: Uuid, parts: &[Vec<u8>]) -> std::sync::Arc<dyn Codec> {
    build_with(root, parts, None)
}

fn build_with(
    root: Uuid,
    parts: &[Vec<u8>],
    registry: Option<&CodecRegistry>,
) -> std::sync::Arc<dyn Codec> {
    typedesc(root, parts).build_codec(registry).unwrap()
}

fn typedesc(root: Uuid, parts: &[Vec<u8>]) -> Typedesc {
    let blob: Vec<u8> = parts.concat();
    let mut input = Input::new(ProtocolVersion::new(2, 0), Bytes::from(blob));
    Typedesc::decode_with_id(root, &mut input).unwrap()
}

fn encoded(codec: &dyn Codec, value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec.encode(&mut buf, value).unwrap();
    buf.to_vec()
}

#[test]
fn bigint_zero() {
    let codec = scalar_codec(&STD_BIGINT).unwrap();
    let zero = Value::BigInt(BigInt::from(0i64));
    let payload = encoded(&*codec, &zero);
    assert_eq!(payload, b"\0\0\0\0\0\0\0\0");
    assert_eq!(codec.decode(&payload).unwrap(), zero);
}

#[test]
fn bigint_round_trip() {
    let codec = scalar_codec(&STD_BIGINT).unwrap();
    for value in [1i64, -1, 9999, 10000, -123_4567_8901, i64::MIN] {
        let wire = Value::BigInt(BigInt::from(value));
        let payload = encoded(&*codec, &wire);
        assert_eq!(codec.decode(&payload).unwrap(), wire, "value {value}");
    }
}

#[test]
fn bigint_rejects_fractional_scale() {
    let codec = scalar_codec(&STD_BIGINT).unwrap();
    // dscale of 2 is only valid for decimals
    let payload = b"\0\x01\0\0\0\0\0\x02\x30\x39";
    assert!(codec.decode(payload).is_err());
}

#[test]
fn decimal_round_trip() {
    use std::str::FromStr;
    let codec = scalar_codec(&STD_DECIMAL).unwrap();
    for text in ["0", "-12345.6789", "0.00004", "9999.9999"] {
        let value = Value::Decimal(bigdecimal::BigDecimal::from_str(text).unwrap().into());
        let payload = encoded(&*codec, &value);
        assert_eq!(codec.decode(&payload).unwrap(), value, "value {text}");
    }
}

#[test]
fn range_of_int32() {
    let root = Uuid::from_u128(0x1001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT32, "std::int32"),
            range_desc(root, "range<std::int32>", 0),
        ],
    );
    let range = Value::Range(Range::new(
        Some(Value::Int32(1)),
        Some(Value::Int32(10)),
        true,
        false,
    ));
    let payload = encoded(&*codec, &range);
    assert_eq!(
        payload,
        b"\x02\0\0\0\x04\0\0\0\x01\0\0\0\x04\0\0\0\x0A"
    );
    let decoded = codec.decode(&payload).unwrap();
    assert_eq!(decoded, range);
    let Value::Range(decoded) = decoded else {
        panic!("expected a range")
    };
    assert!(!decoded.is_empty());
}

#[test]
fn empty_range() {
    let root = Uuid::from_u128(0x1001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT32, "std::int32"),
            range_desc(root, "range<std::int32>", 0),
        ],
    );
    let range = Value::Range(Range::empty());
    let payload = encoded(&*codec, &range);
    assert_eq!(payload, b"\x01");
    assert_eq!(codec.decode(&payload).unwrap(), range);
}

#[test]
fn multi_range_round_trip() {
    let root = Uuid::from_u128(0x1002);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT32, "std::int32"),
            multi_range_desc(root, "multirange<std::int32>", 0),
        ],
    );
    let value = Value::MultiRange(gelx_protocol::value::MultiRange(vec![
        Range::empty(),
        Range::new(Some(Value::Int32(3)), None, true, false),
    ]));
    let payload = encoded(&*codec, &value);
    assert_eq!(codec.decode(&payload).unwrap(), value);
}

#[test]
fn array_of_int64() {
    let root = Uuid::from_u128(0x2001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            array_desc(root, "array<std::int64>", 0),
        ],
    );
    let value = Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
    let payload = encoded(&*codec, &value);
    assert_eq!(
        payload,
        bconcat!(
            b"\0\0\0\x01\0\0\0\0\0\0\0\0\0\0\0\x03\0\0\0\x01"
            b"\0\0\0\x08\0\0\0\0\0\0\0\x01"
            b"\0\0\0\x08\0\0\0\0\0\0\0\x02"
            b"\0\0\0\x08\0\0\0\0\0\0\0\x03"
        )
        .as_ref()
    );
    assert_eq!(codec.decode(&payload).unwrap(), value);
}

#[test]
fn zero_dimension_array_is_empty() {
    let root = Uuid::from_u128(0x2001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            array_desc(root, "array<std::int64>", 0),
        ],
    );
    let payload = b"\0\0\0\0\0\0\0\0\0\0\0\0";
    assert_eq!(codec.decode(payload).unwrap(), Value::Array(Vec::new()));
}

#[test]
fn set_of_arrays_uses_envelope() {
    let root = Uuid::from_u128(0x3001);
    let array_id = Uuid::from_u128(0x3002);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            array_desc(array_id, "array<std::int64>", 0),
            set_desc(root, 1),
        ],
    );
    let array_codec = build(
        array_id,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            array_desc(array_id, "array<std::int64>", 0),
        ],
    );
    let first = encoded(
        &*array_codec,
        &Value::Array(vec![Value::Int64(1), Value::Int64(2)]),
    );
    let second = encoded(&*array_codec, &Value::Array(vec![Value::Int64(3)]));

    // outer array of single-element records wrapping the inner arrays
    let mut payload = Vec::new();
    payload.extend_from_slice(b"\0\0\0\x01\0\0\0\0\0\0\0\0\0\0\0\x02\0\0\0\x01");
    for inner in [&first, &second] {
        let envelope_len = 12 + inner.len();
        payload.extend_from_slice(&(envelope_len as u32).to_be_bytes());
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&(inner.len() as u32).to_be_bytes());
        payload.extend_from_slice(inner);
    }

    assert_eq!(
        codec.decode(&payload).unwrap(),
        Value::Set(vec![
            Value::Array(vec![Value::Int64(1), Value::Int64(2)]),
            Value::Array(vec![Value::Int64(3)]),
        ])
    );
}

#[test]
fn empty_tuple_sentinel() {
    let codec = build(EMPTY_TUPLE_ID, &[tuple_desc(EMPTY_TUPLE_ID, "tuple", &[])]);
    assert_eq!(codec.type_id(), EMPTY_TUPLE_ID);
    let payload = encoded(&*codec, &Value::empty_tuple());
    assert_eq!(payload, b"\0\0\0\0");
    assert_eq!(codec.decode(&payload).unwrap(), Value::empty_tuple());
}

#[test]
fn tuple_count_mismatch_is_fatal() {
    let root = Uuid::from_u128(0x4001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            tuple_desc(root, "tuple<std::int64>", &[0]),
        ],
    );
    // two elements on the wire, one in the descriptor
    let payload = bconcat!(
        b"\0\0\0\x02"
        b"\0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x01"
        b"\0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x02"
    );
    assert!(codec.decode(payload.as_ref()).is_err());
}

#[test]
fn named_tuple_round_trip() {
    let root = Uuid::from_u128(0x5001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            scalar_desc(STD_STR, "std::str"),
            named_tuple_desc(root, "tuple<a, b>", &[("a", 0), ("b", 1)]),
        ],
    );
    let positional = Value::Tuple(vec![Value::Int64(7), Value::Str("x".into())]);
    let payload = encoded(&*codec, &positional);
    let decoded = codec.decode(&payload).unwrap();
    let Value::NamedTuple { shape, fields } = &decoded else {
        panic!("expected a named tuple");
    };
    assert_eq!(shape.names(), ["a", "b"]);
    assert_eq!(fields[0], Value::Int64(7));
    assert_eq!(fields[1], Value::Str("x".into()));
    // a named tuple re-encodes to the same payload
    assert_eq!(encoded(&*codec, &decoded), payload);
}

#[test]
fn enum_labels() {
    let root = Uuid::from_u128(0x6001);
    let codec = build(root, &[enum_desc(root, "default::Color", &["Red", "Green"])]);
    let decoded = codec.decode(b"Green").unwrap();
    let Value::Enum(member) = &decoded else {
        panic!("expected an enum value");
    };
    assert_eq!(member.label(), "Green");
    assert_eq!(member.index(), 1);
    assert_eq!(encoded(&*codec, &decoded), b"Green");
    assert_eq!(encoded(&*codec, &Value::Str("Red".into())), b"Red");
    let mut sink = BytesMut::new();
    assert!(codec.encode(&mut sink, &Value::Str("Blue".into())).is_err());
    assert!(codec.decode(b"Blue").is_err());
}

#[test]
fn object_shape_decodes_and_guards_access() {
    let root = Uuid::from_u128(0x7001);
    let object_id = Uuid::from_u128(0x7002);
    let codec = build(
        root,
        &[
            scalar_desc(STD_UUID, "std::uuid"),
            scalar_desc(STD_STR, "std::str"),
            object_type_desc(object_id, "default::Book"),
            shape_desc(
                root,
                2,
                &[
                    ("id", 0, false, false),
                    ("title", 1, false, false),
                    ("@rank", 1, false, true),
                ],
            ),
        ],
    );
    let payload = bconcat!(
        b"\0\0\0\x03"
        b"\0\0\0\0\0\0\0\x10\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11\x11"
        b"\0\0\0\0\0\0\0\x04Dune"
        b"\0\0\0\0\0\0\0\x05first"
    );
    let decoded = codec.decode(payload.as_ref()).unwrap();
    assert_eq!(
        decoded.property("title").unwrap(),
        Some(&Value::Str("Dune".into()))
    );
    assert!(decoded.property("@rank").is_err());
    assert_eq!(
        decoded.link_property("@rank").unwrap(),
        Some(&Value::Str("first".into()))
    );
    assert!(decoded.link_property("title").is_err());
    // objects are decode-only
    let mut sink = BytesMut::new();
    assert!(codec.encode(&mut sink, &decoded).is_err());
}

#[test]
fn sql_row_decodes_to_record() {
    let root = Uuid::from_u128(0x7101);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            scalar_desc(STD_STR, "std::str"),
            sql_row_desc(root, &[("id", 0), ("title", 1), ("note", 1)]),
        ],
    );
    // three columns, the last one null
    let payload = bconcat!(
        b"\0\0\0\x03"
        b"\0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x07"
        b"\0\0\0\0\0\0\0\x04Dune"
        b"\0\0\0\0\xff\xff\xff\xff"
    );
    let decoded = codec.decode(payload.as_ref()).unwrap();
    let Value::Record { shape, fields } = &decoded else {
        panic!("expected a record");
    };
    assert_eq!(shape.names(), ["id", "title", "note"]);
    assert_eq!(fields[0], Some(Value::Int64(7)));
    // fields resolve by position or by name
    assert_eq!(decoded.record_field_at(0).unwrap(), Some(&Value::Int64(7)));
    assert_eq!(
        decoded.record_field("title").unwrap(),
        Some(&Value::Str("Dune".into()))
    );
    assert_eq!(decoded.record_field("note").unwrap(), None);
    assert!(decoded.record_field("missing").is_err());
    assert!(decoded.record_field_at(3).is_err());
    // SQL rows are result-only
    let mut sink = BytesMut::new();
    assert!(codec.encode(&mut sink, &decoded).is_err());
}

#[test]
fn sparse_input_shape() {
    let root = Uuid::from_u128(0x8001);
    let codec = build(
        root,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            scalar_desc(STD_STR, "std::str"),
            input_shape_desc(root, &[("limit", 0), ("module", 1)]),
        ],
    );
    // only the second field specified
    let payload = bconcat!(
        b"\0\0\0\x01"
        b"\0\0\0\x01\0\0\0\x07default"
    );
    let decoded = codec.decode(payload.as_ref()).unwrap();
    let Value::SparseObject(sparse) = &decoded else {
        panic!("expected a sparse object");
    };
    assert_eq!(sparse.get("limit"), None);
    assert_eq!(
        sparse.get("module"),
        Some(&Some(Value::Str("default".into())))
    );
    assert_eq!(encoded(&*codec, &decoded), payload.as_ref());

    // unknown fields are rejected on encode
    let foreign_shape = gelx_protocol::shape::ObjectShape::new(vec![
        gelx_protocol::shape::ShapeElement {
            flag_implicit: false,
            flag_link_property: false,
            flag_link: false,
            cardinality: None,
            name: "unknown".into(),
        },
    ])
    .unwrap();
    let mut foreign = SparseObject::new_empty(foreign_shape);
    foreign.set("unknown", Some(Value::Int64(1))).unwrap();
    let mut sink = BytesMut::new();
    assert!(codec
        .encode(&mut sink, &Value::SparseObject(foreign))
        .is_err());
}

#[test]
fn duration_rejects_calendar_parts() {
    let codec = scalar_codec(&STD_DURATION).unwrap();
    let value = Value::Duration(Duration::from_micros(1_000_000));
    let payload = encoded(&*codec, &value);
    assert_eq!(payload, b"\0\0\0\0\0\x0f\x42\x40\0\0\0\0\0\0\0\0");
    assert_eq!(codec.decode(&payload).unwrap(), value);
    // non-zero day component
    assert!(codec
        .decode(b"\0\0\0\0\0\x0f\x42\x40\0\0\0\x01\0\0\0\0")
        .is_err());
}

#[test]
fn date_duration_forces_zero_micros() {
    let codec = scalar_codec(&CAL_DATE_DURATION).unwrap();
    let value = Value::DateDuration(DateDuration::new(2, 14));
    let payload = encoded(&*codec, &value);
    assert_eq!(payload, b"\0\0\0\0\0\0\0\0\0\0\0\x02\0\0\0\x0e");
    assert_eq!(codec.decode(&payload).unwrap(), value);
    // non-zero microseconds must be refused
    assert!(codec
        .decode(b"\0\0\0\0\0\0\0\x01\0\0\0\x02\0\0\0\x0e")
        .is_err());
}

#[test]
fn half_vector_codec() {
    let codec = scalar_codec_by_name("ext::pgvector::halfvec", Uuid::from_u128(0x9001)).unwrap();
    let value = Value::Vector(vec![1.0, -2.5]);
    let payload = encoded(&*codec, &value);
    assert_eq!(payload, b"\0\x02\0\0\x3c\x00\xc1\x00");
    assert_eq!(codec.decode(&payload).unwrap(), value);

    let mut sink = BytesMut::new();
    assert!(codec
        .encode(&mut sink, &Value::Vector(vec![1.0e9]))
        .is_err());
}

#[test]
fn sparse_vector_codec() {
    use std::collections::BTreeMap;
    let codec = scalar_codec_by_name("ext::pgvector::sparsevec", Uuid::from_u128(0x9002)).unwrap();
    let vector = gelx_protocol::model::SparseVector::new(
        5,
        BTreeMap::from([(1, 1.5f32), (4, -2.0f32)]),
    )
    .unwrap();
    let value = Value::SparseVector(vector);
    let payload = encoded(&*codec, &value);
    assert_eq!(
        payload,
        bconcat!(
            b"\0\0\0\x05\0\0\0\x02\0\0\0\0"
            b"\0\0\0\x01\0\0\0\x04"
            b"\x3f\xc0\0\0\xc0\0\0\0"
        )
        .as_ref()
    );
    assert_eq!(codec.decode(&payload).unwrap(), value);

    // zero elements must not be stored
    let zero = gelx_protocol::model::SparseVector::new(3, BTreeMap::from([(0, 0.0f32)])).unwrap();
    let mut sink = BytesMut::new();
    assert!(codec
        .encode(&mut sink, &Value::SparseVector(zero))
        .is_err());
}

#[test]
fn registry_reuses_codecs() {
    let registry = CodecRegistry::new();
    let root = Uuid::from_u128(0xA001);
    let parts = [
        scalar_desc(STD_INT64, "std::int64"),
        array_desc(root, "array<std::int64>", 0),
    ];
    let first = build_with(root, &parts, Some(&registry));
    let second = build_with(root, &parts, Some(&registry));
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn derived_scalar_keeps_own_id() {
    let derived_id = Uuid::from_u128(0xB001);
    let codec = build(
        derived_id,
        &[
            scalar_desc(STD_INT64, "std::int64"),
            derived_scalar_desc(derived_id, "default::my_int", &[0]),
        ],
    );
    assert_eq!(codec.type_id(), derived_id);
    let payload = encoded(&*codec, &Value::Int64(42));
    assert_eq!(payload, b"\0\0\0\0\0\0\0\x2a");
    assert_eq!(codec.decode(&payload).unwrap(), Value::Int64(42));
}

#[test]
fn second_decode_pass_consumes_same_bytes() {
    let registry = CodecRegistry::new();
    let root = Uuid::from_u128(0xC001);
    let parts = [
        scalar_desc(STD_INT64, "std::int64"),
        scalar_desc(STD_STR, "std::str"),
        named_tuple_desc(root, "tuple<a, b>", &[("a", 0), ("b", 1)]),
    ];
    let desc_first = typedesc(root, &parts);
    desc_first.build_codec(Some(&registry)).unwrap();
    let registered = registry.len();
    // a second pass over the same blob parses to the same descriptors
    // and builds nothing new
    let desc_second = typedesc(root, &parts);
    assert_eq!(desc_first, desc_second);
    desc_second.build_codec(Some(&registry)).unwrap();
    assert_eq!(registry.len(), registered);
}
