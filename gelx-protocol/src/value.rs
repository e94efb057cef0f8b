/*!
The dynamic [`Value`] sum covering every type the binary protocol can
carry. Decoded rows are built from these; query arguments are encoded
from them.
*/

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration, SparseVector,
};
use crate::shape::{FieldKind, NamedTupleShape, ObjectShape};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nothing,
    Uuid(Uuid),
    Str(String),
    Bytes(Bytes),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    BigInt(BigInt),
    Decimal(Decimal),
    Bool(bool),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    RelativeDuration(RelativeDuration),
    DateDuration(DateDuration),
    ConfigMemory(ConfigMemory),
    Json(Json),
    Set(Vec<Value>),
    Object {
        shape: ObjectShape,
        fields: Vec<Option<Value>>,
    },
    SparseObject(SparseObject),
    Tuple(Vec<Value>),
    NamedTuple {
        shape: NamedTupleShape,
        fields: Vec<Value>,
    },
    Record {
        shape: NamedTupleShape,
        fields: Vec<Option<Value>>,
    },
    Array(Vec<Value>),
    Vector(Vec<f32>),
    SparseVector(SparseVector),
    Geometry(Bytes),
    Enum(EnumValue),
    Range(Range),
    MultiRange(MultiRange),
}

/// A member of a server-defined enumeration type.
///
/// Values of different enumeration types never compare; ordering follows
/// the type's declared member order.
#[derive(Debug, Clone)]
pub struct EnumValue {
    pub(crate) type_id: Uuid,
    pub(crate) label: Arc<str>,
    pub(crate) index: usize,
}

/// A partial object used for input shapes; unset fields stay absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseObject {
    pub shape: ObjectShape,
    /// `None` means the field was not specified at all.
    pub fields: Vec<Option<Option<Value>>>,
}

/// An interval with optional, inclusive-or-exclusive bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub(crate) lower: Option<Box<Value>>,
    pub(crate) upper: Option<Box<Value>>,
    pub(crate) inc_lower: bool,
    pub(crate) inc_upper: bool,
    pub(crate) empty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiRange(pub Vec<Range>);

/// A failed by-name access on an object or record.
#[derive(Debug, PartialEq, derive_more::Display, derive_more::Error)]
pub enum LookupError {
    #[display("field {name:?} is not part of the object")]
    MissingField { name: String },
    #[display("{name:?} is a link property and must be accessed as one")]
    UnexpectedLinkProperty { name: String },
    #[display("{name:?} is not a link property")]
    NotLinkProperty { name: String },
    #[display("position {pos} is out of range for the record")]
    MissingPosition { pos: usize },
}

impl Value {
    /// A short name for error messages.
    pub fn kind(&self) -> &'static str {
        use Value::*;
        match self {
            Nothing => "nothing",
            Uuid(..) => "uuid",
            Str(..) => "string",
            Bytes(..) => "bytes",
            Int16(..) => "int16",
            Int32(..) => "int32",
            Int64(..) => "int64",
            Float32(..) => "float32",
            Float64(..) => "float64",
            BigInt(..) => "bigint",
            Decimal(..) => "decimal",
            Bool(..) => "bool",
            Datetime(..) => "datetime",
            LocalDatetime(..) => "cal::local_datetime",
            LocalDate(..) => "cal::local_date",
            LocalTime(..) => "cal::local_time",
            Duration(..) => "duration",
            RelativeDuration(..) => "cal::relative_duration",
            DateDuration(..) => "cal::date_duration",
            ConfigMemory(..) => "cfg::memory",
            Json(..) => "json",
            Set(..) => "set",
            Object { .. } => "object",
            SparseObject(..) => "sparse_object",
            Tuple(..) => "tuple",
            NamedTuple { .. } => "named_tuple",
            Record { .. } => "record",
            Array(..) => "array",
            Vector(..) => "vector",
            SparseVector(..) => "sparse_vector",
            Geometry(..) => "geometry",
            Enum(..) => "enum",
            Range(..) => "range",
            MultiRange(..) => "multi_range",
        }
    }

    pub fn empty_tuple() -> Value {
        Value::Tuple(Vec::new())
    }

    /// Access a property or link of an object by name.
    ///
    /// Link properties are rejected here; use [`Value::link_property`].
    pub fn property(&self, name: &str) -> Result<Option<&Value>, LookupError> {
        self.object_field(name, false)
    }

    /// Access a link property (an `@name` field) of an object.
    pub fn link_property(&self, name: &str) -> Result<Option<&Value>, LookupError> {
        self.object_field(name, true)
    }

    /// Access a record field by name; `Ok(None)` is a null field.
    pub fn record_field(&self, name: &str) -> Result<Option<&Value>, LookupError> {
        let (shape, fields) = match self {
            Value::Record { shape, fields } => (shape, fields),
            _ => {
                return Err(LookupError::MissingField { name: name.into() });
            }
        };
        match shape.lookup(name) {
            Some(pos) => Ok(fields[pos].as_ref()),
            None => Err(LookupError::MissingField { name: name.into() }),
        }
    }

    /// Access a record field by position.
    pub fn record_field_at(&self, pos: usize) -> Result<Option<&Value>, LookupError> {
        let Value::Record { fields, .. } = self else {
            return Err(LookupError::MissingPosition { pos });
        };
        fields
            .get(pos)
            .map(|field| field.as_ref())
            .ok_or(LookupError::MissingPosition { pos })
    }

    fn object_field(&self, name: &str, link_property: bool) -> Result<Option<&Value>, LookupError> {
        let (shape, fields) = match self {
            Value::Object { shape, fields } => (shape, fields),
            _ => {
                return Err(LookupError::MissingField { name: name.into() });
            }
        };
        match shape.lookup(name) {
            None => Err(LookupError::MissingField { name: name.into() }),
            Some((pos, kind)) => {
                if link_property && kind != FieldKind::LinkProperty {
                    Err(LookupError::NotLinkProperty { name: name.into() })
                } else if !link_property && kind == FieldKind::LinkProperty {
                    Err(LookupError::UnexpectedLinkProperty { name: name.into() })
                } else {
                    Ok(fields[pos].as_ref())
                }
            }
        }
    }
}

impl EnumValue {
    pub fn new(type_id: Uuid, label: Arc<str>, index: usize) -> EnumValue {
        EnumValue {
            type_id,
            label,
            index,
        }
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn type_id(&self) -> Uuid {
        self.type_id
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &EnumValue) -> bool {
        self.type_id == other.type_id && self.label == other.label
    }
}

impl Eq for EnumValue {}

impl PartialOrd for EnumValue {
    /// `None` for members of different enumeration types.
    fn partial_cmp(&self, other: &EnumValue) -> Option<Ordering> {
        if self.type_id != other.type_id {
            return None;
        }
        Some(self.index.cmp(&other.index))
    }
}

impl std::fmt::Display for EnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl SparseObject {
    /// An object with every field unset.
    pub fn new_empty(shape: ObjectShape) -> SparseObject {
        let fields = vec![None; shape.len()];
        SparseObject { shape, fields }
    }
    pub fn set(&mut self, name: &str, value: Option<Value>) -> Result<(), LookupError> {
        match self.shape.lookup(name) {
            Some((pos, _)) => {
                self.fields[pos] = Some(value);
                Ok(())
            }
            None => Err(LookupError::MissingField { name: name.into() }),
        }
    }
    pub fn get(&self, name: &str) -> Option<&Option<Value>> {
        self.shape
            .lookup(name)
            .and_then(|(pos, _)| self.fields[pos].as_ref())
    }
}

impl Range {
    pub fn new(
        lower: Option<Value>,
        upper: Option<Value>,
        inc_lower: bool,
        inc_upper: bool,
    ) -> Range {
        Range {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            inc_lower,
            inc_upper,
            empty: false,
        }
    }
    /// The canonical empty range: no bounds, both ends exclusive.
    pub fn empty() -> Range {
        Range {
            lower: None,
            upper: None,
            inc_lower: false,
            inc_upper: false,
            empty: true,
        }
    }
    pub fn lower(&self) -> Option<&Value> {
        self.lower.as_deref()
    }
    pub fn upper(&self) -> Option<&Value> {
        self.upper.as_deref()
    }
    pub fn inc_lower(&self) -> bool {
        self.inc_lower
    }
    pub fn inc_upper(&self) -> bool {
        self.inc_upper
    }
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Cardinality;
    use crate::shape::ShapeElement;

    fn book_shape() -> ObjectShape {
        let element = |name: &str, link: bool, link_property: bool| ShapeElement {
            flag_implicit: false,
            flag_link_property: link_property,
            flag_link: link,
            cardinality: Some(Cardinality::One),
            name: name.into(),
        };
        ObjectShape::new(vec![
            element("id", false, false),
            element("title", false, false),
            element("author", true, false),
            element("@order", false, true),
        ])
        .unwrap()
    }

    fn book() -> Value {
        Value::Object {
            shape: book_shape(),
            fields: vec![
                Some(Value::Uuid(Uuid::from_u128(7))),
                Some(Value::Str("Dune".into())),
                None,
                Some(Value::Int64(3)),
            ],
        }
    }

    #[test]
    fn property_access() {
        let book = book();
        assert_eq!(book.property("title").unwrap(), Some(&Value::Str("Dune".into())));
        assert_eq!(book.property("author").unwrap(), None);
        assert_eq!(
            book.property("missing"),
            Err(LookupError::MissingField {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn link_property_access_is_exclusive() {
        let book = book();
        assert_eq!(
            book.link_property("@order").unwrap(),
            Some(&Value::Int64(3))
        );
        assert_eq!(
            book.property("@order"),
            Err(LookupError::UnexpectedLinkProperty {
                name: "@order".into()
            })
        );
        assert_eq!(
            book.link_property("title"),
            Err(LookupError::NotLinkProperty {
                name: "title".into()
            })
        );
    }

    #[test]
    fn structural_equality() {
        assert_eq!(book(), book());
    }

    #[test]
    fn record_access_by_position_or_name() {
        let record = Value::Record {
            shape: NamedTupleShape::new(vec!["id".into(), "title".into(), "note".into()]).unwrap(),
            fields: vec![
                Some(Value::Int64(7)),
                Some(Value::Str("Dune".into())),
                None,
            ],
        };
        assert_eq!(record.record_field("id").unwrap(), Some(&Value::Int64(7)));
        assert_eq!(record.record_field_at(1).unwrap(), Some(&Value::Str("Dune".into())));
        // null fields read as absent, unknown names and positions fail
        assert_eq!(record.record_field("note").unwrap(), None);
        assert_eq!(record.record_field_at(2).unwrap(), None);
        assert_eq!(
            record.record_field("missing"),
            Err(LookupError::MissingField {
                name: "missing".into()
            })
        );
        assert_eq!(
            record.record_field_at(3),
            Err(LookupError::MissingPosition { pos: 3 })
        );
    }

    #[test]
    fn enums_of_different_types_do_not_compare() {
        let color = EnumValue::new(Uuid::from_u128(1), "Red".into(), 0);
        let other_color = EnumValue::new(Uuid::from_u128(1), "Blue".into(), 1);
        let size = EnumValue::new(Uuid::from_u128(2), "Red".into(), 0);
        assert_eq!(color.partial_cmp(&other_color), Some(Ordering::Less));
        assert_eq!(color.partial_cmp(&size), None);
        assert_ne!(color, size);
    }

    #[test]
    fn empty_range_has_no_bounds() {
        let range = Range::empty();
        assert!(range.is_empty());
        assert_eq!(range.lower(), None);
        assert_eq!(range.upper(), None);
        assert!(!range.inc_lower());
        assert!(!range.inc_upper());
    }
}
