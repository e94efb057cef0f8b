/*!
Type descriptors: the server's self-describing encoding of result and
argument types.

Protocol >= 2.0 frames every descriptor with a 32-bit length and names
scalar and container types; protocol 1.x descriptors are unframed and the
decoder's cursor motion is the only delimiter. One decode table serves
both, so there is no separate skip routine to drift out of sync.
*/

use bytes::Buf;
use snafu::ensure;
use uuid::Uuid;

use crate::common::Cardinality;
use crate::encoding::{Decode, Input};
use crate::errors::{self, DecodeError};
use crate::features::ProtocolVersion;

/// A position in a descriptor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypePos(pub u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Set(SetDescriptor),
    ObjectShape(ObjectShapeDescriptor),
    BaseScalar(BaseScalarTypeDescriptor),
    Scalar(ScalarTypeDescriptor),
    Tuple(TupleTypeDescriptor),
    NamedTuple(NamedTupleTypeDescriptor),
    Array(ArrayTypeDescriptor),
    Enumeration(EnumerationTypeDescriptor),
    InputShape(InputShapeTypeDescriptor),
    Range(RangeTypeDescriptor),
    MultiRange(MultiRangeTypeDescriptor),
    Object(ObjectTypeDescriptor),
    Compound(CompoundTypeDescriptor),
    SqlRow(SqlRowDescriptor),
    TypeAnnotation(TypeAnnotationDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDescriptor {
    pub id: Uuid,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShapeDescriptor {
    pub id: Uuid,
    pub ephemeral_free_shape: bool,
    pub type_pos: Option<TypePos>,
    pub elements: Vec<ShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub cardinality: Option<Cardinality>,
    pub name: String,
    pub type_pos: TypePos,
    pub source_type_pos: Option<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseScalarTypeDescriptor {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    /// The position holding the fundamental codec: the last ancestor for
    /// protocol >= 2.0, the referenced base type for 1.x.
    pub base_type_pos: Option<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub element_types: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub elements: Vec<TupleElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleElement {
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
    pub dimensions: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShapeTypeDescriptor {
    pub id: Uuid,
    pub elements: Vec<InputShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShapeElement {
    pub cardinality: Option<Cardinality>,
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiRangeTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeOperation {
    Union = 1,
    Intersection = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundTypeDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub schema_defined: Option<bool>,
    pub op: TypeOperation,
    pub components: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRowDescriptor {
    pub id: Uuid,
    pub elements: Vec<TupleElement>,
}

/// An annotation descriptor (tag with the high bit set).
///
/// Tag 255 carries the display name of the annotated type; other
/// annotation kinds are consumed and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotationDescriptor {
    pub annotated_tag: u8,
    /// The annotated type id (protocol 1.x only).
    pub id: Option<Uuid>,
    /// The annotated descriptor position (protocol >= 2.0 only).
    pub target_pos: Option<TypePos>,
    /// The type name, for tag 255.
    pub name: Option<String>,
}

/// A decoded descriptor blob: the positional descriptor list and the
/// root type the server named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typedesc {
    pub(crate) proto: ProtocolVersion,
    pub(crate) array: Vec<Descriptor>,
    pub(crate) annotations: Vec<TypeAnnotationDescriptor>,
    pub(crate) root_id: Uuid,
    pub(crate) root_pos: Option<TypePos>,
}

impl Descriptor {
    pub fn decode(buf: &mut Input) -> Result<Descriptor, DecodeError> {
        if buf.proto().is_2() {
            Descriptor::decode_2(buf)
        } else {
            Descriptor::decode_1(buf)
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        use Descriptor::*;
        match self {
            Set(d) => Some(d.id),
            ObjectShape(d) => Some(d.id),
            BaseScalar(d) => Some(d.id),
            Scalar(d) => Some(d.id),
            Tuple(d) => Some(d.id),
            NamedTuple(d) => Some(d.id),
            Array(d) => Some(d.id),
            Enumeration(d) => Some(d.id),
            InputShape(d) => Some(d.id),
            Range(d) => Some(d.id),
            MultiRange(d) => Some(d.id),
            Object(d) => Some(d.id),
            Compound(d) => Some(d.id),
            SqlRow(d) => Some(d.id),
            TypeAnnotation(..) => None,
        }
    }

    /// Decode one length-prefixed descriptor (protocol >= 2.0).
    fn decode_2(buf: &mut Input) -> Result<Descriptor, DecodeError> {
        buf.ensure(4)?;
        let desc_len = buf.get_u32() as usize;
        buf.ensure(desc_len)?;
        let mut cur = buf.slice(..desc_len);
        buf.advance(desc_len);
        let result = Descriptor::decode_2_body(&mut cur)?;
        cur.expect_end()?;
        Ok(result)
    }

    fn decode_2_body(cur: &mut Input) -> Result<Descriptor, DecodeError> {
        use Descriptor as D;
        cur.ensure(1)?;
        let tag = cur.get_u8();
        if tag >= 0x7F {
            cur.ensure(2)?;
            let target_pos = TypePos(cur.get_u16());
            let name = if tag == 0xFF {
                Some(String::decode(cur)?)
            } else {
                // unknown annotation, consume the rest
                cur.advance(cur.remaining());
                None
            };
            return Ok(D::TypeAnnotation(TypeAnnotationDescriptor {
                annotated_tag: tag,
                id: None,
                target_pos: Some(target_pos),
                name,
            }));
        }
        let id = Uuid::decode(cur)?;
        let result = match tag {
            0x00 => D::Set(SetDescriptor {
                id,
                type_pos: decode_type_pos(cur)?,
            }),
            0x01 => {
                cur.ensure(3)?;
                let ephemeral_free_shape = decode_bool(cur)?;
                let type_pos = TypePos(cur.get_u16());
                let element_count = decode_u16(cur)?;
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    elements.push(ShapeElement::decode_2(cur)?);
                }
                D::ObjectShape(ObjectShapeDescriptor {
                    id,
                    ephemeral_free_shape,
                    type_pos: Some(type_pos),
                    elements,
                })
            }
            0x02 => D::BaseScalar(BaseScalarTypeDescriptor { id }),
            0x03 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                D::Scalar(ScalarTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    base_type_pos: ancestors.last().copied(),
                    ancestors,
                })
            }
            0x04 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let element_types = decode_type_pos_list(cur)?;
                D::Tuple(TupleTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    element_types,
                })
            }
            0x05 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let elements = decode_tuple_elements(cur)?;
                D::NamedTuple(NamedTupleTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    elements,
                })
            }
            0x06 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let type_pos = decode_type_pos(cur)?;
                let dimensions = decode_dimensions(cur)?;
                D::Array(ArrayTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    type_pos,
                    dimensions,
                })
            }
            0x07 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let members = decode_string_list(cur)?;
                D::Enumeration(EnumerationTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    members,
                })
            }
            0x08 => {
                let element_count = decode_u16(cur)?;
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    elements.push(InputShapeElement::decode(cur)?);
                }
                D::InputShape(InputShapeTypeDescriptor { id, elements })
            }
            0x09 => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let type_pos = decode_type_pos(cur)?;
                D::Range(RangeTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    type_pos,
                })
            }
            0x0A => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                D::Object(ObjectTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                })
            }
            0x0B => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                cur.ensure(1)?;
                let op = match cur.get_u8() {
                    1 => TypeOperation::Union,
                    2 => TypeOperation::Intersection,
                    _ => return errors::InvalidTypeDescriptor { descriptor: tag }.fail(),
                };
                let components = decode_type_pos_list(cur)?;
                D::Compound(CompoundTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    op,
                    components,
                })
            }
            0x0C => {
                let name = String::decode(cur)?;
                let schema_defined = decode_bool(cur)?;
                let ancestors = decode_type_pos_list(cur)?;
                let type_pos = decode_type_pos(cur)?;
                D::MultiRange(MultiRangeTypeDescriptor {
                    id,
                    name: Some(name),
                    schema_defined: Some(schema_defined),
                    ancestors,
                    type_pos,
                })
            }
            0x0D => {
                let elements = decode_tuple_elements(cur)?;
                D::SqlRow(SqlRowDescriptor { id, elements })
            }
            descriptor => return errors::InvalidTypeDescriptor { descriptor }.fail(),
        };
        Ok(result)
    }

    /// Decode one unframed descriptor (protocol 1.x).
    fn decode_1(buf: &mut Input) -> Result<Descriptor, DecodeError> {
        use Descriptor as D;
        buf.ensure(1)?;
        let tag = buf.get_u8();
        if tag >= 0x7F {
            let id = Uuid::decode(buf)?;
            let annotation = String::decode(buf)?;
            return Ok(D::TypeAnnotation(TypeAnnotationDescriptor {
                annotated_tag: tag,
                id: Some(id),
                target_pos: None,
                name: (tag == 0xFF).then_some(annotation),
            }));
        }
        let id = Uuid::decode(buf)?;
        let result = match tag {
            0x00 => D::Set(SetDescriptor {
                id,
                type_pos: decode_type_pos(buf)?,
            }),
            0x01 => {
                let element_count = decode_u16(buf)?;
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    elements.push(ShapeElement::decode_1(buf)?);
                }
                D::ObjectShape(ObjectShapeDescriptor {
                    id,
                    ephemeral_free_shape: false,
                    type_pos: None,
                    elements,
                })
            }
            0x02 => D::BaseScalar(BaseScalarTypeDescriptor { id }),
            0x03 => {
                let base_type_pos = decode_type_pos(buf)?;
                D::Scalar(ScalarTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    base_type_pos: Some(base_type_pos),
                })
            }
            0x04 => {
                let element_types = decode_type_pos_list(buf)?;
                D::Tuple(TupleTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    element_types,
                })
            }
            0x05 => {
                let elements = decode_tuple_elements(buf)?;
                D::NamedTuple(NamedTupleTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    elements,
                })
            }
            0x06 => {
                let type_pos = decode_type_pos(buf)?;
                let dimensions = decode_dimensions(buf)?;
                D::Array(ArrayTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    type_pos,
                    dimensions,
                })
            }
            0x07 => {
                let members = decode_string_list(buf)?;
                D::Enumeration(EnumerationTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    members,
                })
            }
            0x08 => {
                let element_count = decode_u16(buf)?;
                let mut elements = Vec::with_capacity(element_count as usize);
                for _ in 0..element_count {
                    elements.push(InputShapeElement::decode(buf)?);
                }
                D::InputShape(InputShapeTypeDescriptor { id, elements })
            }
            0x09 => {
                let type_pos = decode_type_pos(buf)?;
                D::Range(RangeTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    type_pos,
                })
            }
            0x0C => {
                let type_pos = decode_type_pos(buf)?;
                D::MultiRange(MultiRangeTypeDescriptor {
                    id,
                    name: None,
                    schema_defined: None,
                    ancestors: Vec::new(),
                    type_pos,
                })
            }
            descriptor => return errors::InvalidTypeDescriptor { descriptor }.fail(),
        };
        Ok(result)
    }
}

impl ShapeElement {
    fn decode_2(cur: &mut Input) -> Result<ShapeElement, DecodeError> {
        let (flags, cardinality) = decode_element_header(cur)?;
        let name = String::decode(cur)?;
        cur.ensure(4)?;
        let type_pos = TypePos(cur.get_u16());
        let source_type_pos = TypePos(cur.get_u16());
        Ok(ShapeElement {
            flag_implicit: flags & 0b001 != 0,
            flag_link_property: flags & 0b010 != 0,
            flag_link: flags & 0b100 != 0,
            cardinality,
            name,
            type_pos,
            source_type_pos: Some(source_type_pos),
        })
    }

    fn decode_1(buf: &mut Input) -> Result<ShapeElement, DecodeError> {
        let (flags, cardinality) = decode_element_header(buf)?;
        let name = String::decode(buf)?;
        let type_pos = decode_type_pos(buf)?;
        Ok(ShapeElement {
            flag_implicit: flags & 0b001 != 0,
            flag_link_property: flags & 0b010 != 0,
            flag_link: flags & 0b100 != 0,
            cardinality,
            name,
            type_pos,
            source_type_pos: None,
        })
    }
}

impl InputShapeElement {
    fn decode(buf: &mut Input) -> Result<InputShapeElement, DecodeError> {
        let (_flags, cardinality) = decode_element_header(buf)?;
        let name = String::decode(buf)?;
        let type_pos = decode_type_pos(buf)?;
        Ok(InputShapeElement {
            cardinality,
            name,
            type_pos,
        })
    }
}

fn decode_element_header(buf: &mut Input) -> Result<(u32, Option<Cardinality>), DecodeError> {
    buf.ensure(5)?;
    let flags = buf.get_u32();
    let cardinality = match buf.get_u8() {
        0 => None,
        card => Some(Cardinality::try_from(card)?),
    };
    Ok((flags, cardinality))
}

fn decode_u16(buf: &mut Input) -> Result<u16, DecodeError> {
    buf.ensure(2)?;
    Ok(buf.get_u16())
}

fn decode_bool(buf: &mut Input) -> Result<bool, DecodeError> {
    buf.ensure(1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        val => errors::InvalidBool { val }.fail(),
    }
}

fn decode_type_pos(buf: &mut Input) -> Result<TypePos, DecodeError> {
    Ok(TypePos(decode_u16(buf)?))
}

fn decode_type_pos_list(buf: &mut Input) -> Result<Vec<TypePos>, DecodeError> {
    let count = decode_u16(buf)?;
    buf.ensure(count as usize * 2)?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        list.push(TypePos(buf.get_u16()));
    }
    Ok(list)
}

fn decode_string_list(buf: &mut Input) -> Result<Vec<String>, DecodeError> {
    let count = decode_u16(buf)?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        list.push(String::decode(buf)?);
    }
    Ok(list)
}

fn decode_tuple_elements(buf: &mut Input) -> Result<Vec<TupleElement>, DecodeError> {
    let count = decode_u16(buf)?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = String::decode(buf)?;
        let type_pos = decode_type_pos(buf)?;
        list.push(TupleElement { name, type_pos });
    }
    Ok(list)
}

fn decode_dimensions(buf: &mut Input) -> Result<Vec<Option<u32>>, DecodeError> {
    let count = decode_u16(buf)?;
    buf.ensure(count as usize * 4)?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // -1 marks an unbounded dimension
        let dim = buf.get_i32();
        list.push(u32::try_from(dim).ok());
    }
    Ok(list)
}

impl Typedesc {
    /// Decode a whole descriptor blob; `root_id` names the outermost type.
    pub fn decode_with_id(root_id: Uuid, buf: &mut Input) -> Result<Typedesc, DecodeError> {
        let proto = buf.proto().clone();
        let mut array = Vec::new();
        let mut annotations = Vec::new();
        let mut root_pos = None;
        while buf.remaining() > 0 {
            match Descriptor::decode(buf)? {
                // annotations do not occupy a type position
                Descriptor::TypeAnnotation(annotation) => annotations.push(annotation),
                descriptor => {
                    ensure!(
                        array.len() <= u16::MAX as usize,
                        errors::TooManyDescriptors { index: array.len() }
                    );
                    if descriptor.id() == Some(root_id) {
                        root_pos = Some(TypePos(array.len() as u16));
                    }
                    array.push(descriptor);
                }
            }
        }
        buf.expect_end()?;
        Ok(Typedesc {
            proto,
            array,
            annotations,
            root_id,
            root_pos,
        })
    }

    pub fn nothing(proto: &ProtocolVersion) -> Typedesc {
        Typedesc {
            proto: proto.clone(),
            array: Vec::new(),
            annotations: Vec::new(),
            root_id: Uuid::from_u128(0),
            root_pos: None,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.root_id
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    pub fn root_pos(&self) -> Option<TypePos> {
        self.root_pos
    }
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.array
    }
    pub fn annotations(&self) -> &[TypeAnnotationDescriptor] {
        &self.annotations
    }
    pub fn get(&self, type_pos: TypePos) -> Result<&Descriptor, DecodeError> {
        self.array.get(type_pos.0 as usize).ok_or_else(|| {
            errors::TooManyDescriptors {
                index: type_pos.0 as usize,
            }
            .build()
        })
    }
}
