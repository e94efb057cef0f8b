//! Session-scoped settings sent to the server with every request.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::BytesMut;
use uuid::Uuid;

use gelx_errors::{Error, ErrorKind, InterfaceError, ProtocolEncodingError};
use gelx_protocol::common::{RawTypedesc, State};
use gelx_protocol::descriptors::{Descriptor, Typedesc};
use gelx_protocol::registry::CodecRegistry;
use gelx_protocol::shape::{ObjectShape, ShapeElement};
use gelx_protocol::value::{SparseObject, Value};

/// The session state triple-plus-one: default module, module aliases,
/// session config and globals.
///
/// Immutable; the client holds it behind an `Arc` and memoizes the
/// encoded form until the reference or the state descriptor changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    module: Option<String>,
    aliases: BTreeMap<String, String>,
    config: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn new() -> SessionState {
        SessionState::default()
    }

    pub fn with_default_module(&self, module: Option<String>) -> SessionState {
        SessionState {
            module,
            ..self.clone()
        }
    }

    pub fn with_aliases(
        &self,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> SessionState {
        let mut clone = self.clone();
        clone.aliases.extend(aliases);
        clone
    }

    pub fn with_config(&self, config: impl IntoIterator<Item = (String, Value)>) -> SessionState {
        let mut clone = self.clone();
        clone.config.extend(config);
        clone
    }

    pub fn with_globals(&self, globals: impl IntoIterator<Item = (String, Value)>) -> SessionState {
        let mut clone = self.clone();
        for (name, value) in globals {
            // unqualified names refer to the session's default module
            let name = if name.contains("::") {
                name
            } else {
                format!("{}::{}", self.module.as_deref().unwrap_or("default"), name)
            };
            clone.globals.insert(name, value);
        }
        clone
    }

    pub fn is_default(&self) -> bool {
        self.module.is_none()
            && self.aliases.is_empty()
            && self.config.is_empty()
            && self.globals.is_empty()
    }

    /// Serialize through the server-issued state descriptor.
    pub fn encode(
        &self,
        state_desc: &RawTypedesc,
        registry: &CodecRegistry,
    ) -> Result<State, Error> {
        if self.is_default() {
            return Ok(State::empty());
        }
        let typedesc = state_desc
            .decode()
            .map_err(ProtocolEncodingError::with_source)?;
        let codec = typedesc
            .build_codec(Some(registry))
            .map_err(ProtocolEncodingError::with_source)?;
        let value = self.to_value(&typedesc)?;
        let mut buf = BytesMut::new();
        codec
            .encode(&mut buf, &value)
            .map_err(ProtocolEncodingError::with_source)?;
        Ok(State {
            typedesc_id: *typedesc.id(),
            data: buf.freeze(),
        })
    }

    fn to_value(&self, typedesc: &Typedesc) -> Result<Value, Error> {
        let root = typedesc
            .root_pos()
            .and_then(|pos| typedesc.get(pos).ok())
            .ok_or_else(|| {
                InterfaceError::with_message("the server did not provide a state descriptor")
            })?;
        let Descriptor::InputShape(shape) = root else {
            return Err(InterfaceError::with_message(
                "unexpected state descriptor shape",
            ));
        };

        let mut sparse = SparseObject::new_empty(input_shape_table(
            shape.elements.iter().map(|element| element.name.clone()),
        )?);
        for element in &shape.elements {
            match element.name.as_str() {
                "module" => {
                    if let Some(module) = &self.module {
                        sparse
                            .set("module", Some(Value::Str(module.clone())))
                            .expect("shape has a module field");
                    }
                }
                "aliases" => {
                    if !self.aliases.is_empty() {
                        let aliases = self
                            .aliases
                            .iter()
                            .map(|(alias, target)| {
                                Value::Tuple(vec![
                                    Value::Str(alias.clone()),
                                    Value::Str(target.clone()),
                                ])
                            })
                            .collect();
                        sparse
                            .set("aliases", Some(Value::Array(aliases)))
                            .expect("shape has an aliases field");
                    }
                }
                "config" => {
                    if !self.config.is_empty() {
                        let value =
                            nested_sparse(typedesc, element.type_pos, &self.config, "config")?;
                        sparse
                            .set("config", Some(value))
                            .expect("shape has a config field");
                    }
                }
                "globals" => {
                    if !self.globals.is_empty() {
                        let value =
                            nested_sparse(typedesc, element.type_pos, &self.globals, "globals")?;
                        sparse
                            .set("globals", Some(value))
                            .expect("shape has a globals field");
                    }
                }
                _ => {}
            }
        }
        Ok(Value::SparseObject(sparse))
    }
}

fn input_shape_table(
    names: impl IntoIterator<Item = String>,
) -> Result<ObjectShape, Error> {
    let elements = names
        .into_iter()
        .map(|name| ShapeElement {
            flag_implicit: false,
            flag_link_property: false,
            flag_link: false,
            cardinality: None,
            name,
        })
        .collect();
    ObjectShape::new(elements)
        .map_err(|e| InterfaceError::with_message(format!("invalid state shape: {e}")))
}

fn nested_sparse(
    typedesc: &Typedesc,
    type_pos: gelx_protocol::descriptors::TypePos,
    values: &BTreeMap<String, Value>,
    section: &str,
) -> Result<Value, Error> {
    let descriptor = typedesc
        .get(type_pos)
        .map_err(ProtocolEncodingError::with_source)?;
    let Descriptor::InputShape(shape) = descriptor else {
        return Err(InterfaceError::with_message(format!(
            "unexpected descriptor for session {section}"
        )));
    };
    let table = input_shape_table(shape.elements.iter().map(|element| element.name.clone()))?;
    let mut sparse = SparseObject::new_empty(table);
    for (name, value) in values {
        sparse.set(name, Some(value.clone())).map_err(|_| {
            InterfaceError::with_message(format!(
                "{name:?} is not a valid session {section} name for this server"
            ))
        })?;
    }
    Ok(Value::SparseObject(sparse))
}

/// Memoizes the encoded state for one (state, descriptor) pair.
#[derive(Default)]
pub struct StateCache {
    cached: Option<(usize, Uuid, State)>,
}

impl StateCache {
    pub fn new() -> StateCache {
        StateCache::default()
    }

    pub fn encode(
        &mut self,
        state: &Arc<SessionState>,
        state_desc: &RawTypedesc,
        registry: &CodecRegistry,
    ) -> Result<State, Error> {
        let key = Arc::as_ptr(state) as usize;
        if let Some((cached_key, cached_desc, encoded)) = &self.cached {
            if *cached_key == key && *cached_desc == state_desc.id {
                return Ok(encoded.clone());
            }
        }
        let encoded = state.encode(state_desc, registry)?;
        self.cached = Some((key, state_desc.id, encoded.clone()));
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_encodes_empty() {
        let state = SessionState::new();
        let registry = CodecRegistry::new();
        let encoded = state
            .encode(&RawTypedesc::uninitialized(), &registry)
            .unwrap();
        assert_eq!(encoded, State::empty());
    }

    #[test]
    fn globals_are_qualified() {
        let state = SessionState::new().with_globals([("current_user".to_string(), Value::Str("a".into()))]);
        assert!(state.globals.contains_key("default::current_user"));
        let modular = SessionState::new()
            .with_default_module(Some("app".into()))
            .with_globals([("current_user".to_string(), Value::Str("a".into()))]);
        assert!(modular.globals.contains_key("app::current_user"));
    }
}
