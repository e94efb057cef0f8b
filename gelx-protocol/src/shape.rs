//! Shared field tables for objects, named tuples and input shapes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::Cardinality;

/// What a shape field name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Property,
    Link,
    LinkProperty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub cardinality: Option<Cardinality>,
    pub name: String,
}

impl ShapeElement {
    pub fn kind(&self) -> FieldKind {
        if self.flag_link_property {
            FieldKind::LinkProperty
        } else if self.flag_link {
            FieldKind::Link
        } else {
            FieldKind::Property
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ObjectShapeInfo {
    pub elements: Vec<ShapeElement>,
    name_to_pos: HashMap<String, usize>,
    id_pos: Option<usize>,
}

/// The field table shared by every object of one result shape.
///
/// Cheap to clone; object values hold a handle to the shape they were
/// decoded with.
#[derive(Debug, Clone)]
pub struct ObjectShape(pub(crate) Arc<ObjectShapeInfo>);

#[derive(Debug, PartialEq, Eq)]
pub struct NamedTupleShapeInfo {
    pub names: Vec<String>,
    name_to_pos: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct NamedTupleShape(pub(crate) Arc<NamedTupleShapeInfo>);

#[derive(Debug, PartialEq, derive_more::Display, derive_more::Error)]
pub enum ShapeError {
    #[display("duplicate field name {name:?} in shape")]
    DuplicateName { name: String },
}

impl ObjectShape {
    pub fn new(elements: Vec<ShapeElement>) -> Result<ObjectShape, ShapeError> {
        let mut name_to_pos = HashMap::with_capacity(elements.len());
        let mut id_pos = None;
        for (pos, element) in elements.iter().enumerate() {
            if name_to_pos.insert(element.name.clone(), pos).is_some() {
                return Err(ShapeError::DuplicateName {
                    name: element.name.clone(),
                });
            }
            if element.name == "id" && !element.flag_link_property {
                id_pos = Some(pos);
            }
        }
        Ok(ObjectShape(Arc::new(ObjectShapeInfo {
            elements,
            name_to_pos,
            id_pos,
        })))
    }
    pub fn elements(&self) -> &[ShapeElement] {
        &self.0.elements
    }
    pub fn len(&self) -> usize {
        self.0.elements.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.elements.is_empty()
    }
    /// The position of the `id` property, if the shape has one.
    pub fn id_pos(&self) -> Option<usize> {
        self.0.id_pos
    }
    /// Resolve a field name to its position and kind.
    pub fn lookup(&self, name: &str) -> Option<(usize, FieldKind)> {
        self.0
            .name_to_pos
            .get(name)
            .map(|&pos| (pos, self.0.elements[pos].kind()))
    }
}

impl PartialEq for ObjectShape {
    fn eq(&self, other: &ObjectShape) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ObjectShape {}

impl NamedTupleShape {
    pub fn new(names: Vec<String>) -> Result<NamedTupleShape, ShapeError> {
        let mut name_to_pos = HashMap::with_capacity(names.len());
        for (pos, name) in names.iter().enumerate() {
            if name_to_pos.insert(name.clone(), pos).is_some() {
                return Err(ShapeError::DuplicateName { name: name.clone() });
            }
        }
        Ok(NamedTupleShape(Arc::new(NamedTupleShapeInfo {
            names,
            name_to_pos,
        })))
    }
    pub fn names(&self) -> &[String] {
        &self.0.names
    }
    pub fn len(&self) -> usize {
        self.0.names.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.names.is_empty()
    }
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.0.name_to_pos.get(name).copied()
    }
}

impl PartialEq for NamedTupleShape {
    fn eq(&self, other: &NamedTupleShape) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for NamedTupleShape {}
