/*!
Query argument collections and their encoding against an input codec.
*/

use std::collections::HashMap;

use crate::value::Value;

/// Arguments for one query call: positional, named, or none.
///
/// EdgeQL parameters are always delivered through an input shape whose
/// field names are either decimal indexes (`$0`, `$1`, …) or the
/// parameter names; both styles map onto this container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    named: HashMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Arguments {
        Arguments::default()
    }
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
    pub fn push(&mut self, value: Value) -> &mut Arguments {
        self.positional.push(value);
        self
    }
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Arguments {
        self.named.insert(name.into(), value);
        self
    }
    /// Find the value for one input-shape field.
    ///
    /// Decimal field names fall back to the positional list.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.named.get(name) {
            return Some(value);
        }
        name.parse::<usize>()
            .ok()
            .and_then(|index| self.positional.get(index))
    }
}

impl From<()> for Arguments {
    fn from(_: ()) -> Arguments {
        Arguments::new()
    }
}

impl<const N: usize> From<[Value; N]> for Arguments {
    fn from(values: [Value; N]) -> Arguments {
        Arguments {
            positional: values.into(),
            named: HashMap::new(),
        }
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(positional: Vec<Value>) -> Arguments {
        Arguments {
            positional,
            named: HashMap::new(),
        }
    }
}

impl<S: Into<String>, const N: usize> From<[(S, Value); N]> for Arguments {
    fn from(values: [(S, Value); N]) -> Arguments {
        Arguments {
            positional: Vec::new(),
            named: values
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}
