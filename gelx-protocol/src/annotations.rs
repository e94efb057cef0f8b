//! Typed access to well-known message annotations.

use serde::Deserialize;

use crate::encoding::Annotations;
use crate::errors::{self, DecodeError};

/// A compiler warning attached to a parse or execute result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Warning {
    pub message: String,
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
}

/// Parse the JSON array under the `warnings` annotation key.
pub fn decode_warnings(annotations: &Annotations) -> Result<Vec<Warning>, DecodeError> {
    let Some(raw) = annotations.get("warnings") else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|_| {
        errors::InvalidAnnotationFormat {
            annotation: "warnings",
        }
        .build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn warnings_parse() {
        let mut annotations = HashMap::new();
        annotations.insert(
            "warnings".to_string(),
            r#"[{"message": "deprecated index", "hint": "use fts::index"}]"#.to_string(),
        );
        let warnings = decode_warnings(&annotations).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "deprecated index");
        assert_eq!(warnings[0].hint.as_deref(), Some("use fts::index"));
    }

    #[test]
    fn missing_key_is_no_warnings() {
        assert_eq!(decode_warnings(&HashMap::new()).unwrap(), Vec::new());
    }

    #[test]
    fn malformed_warnings_fail() {
        let mut annotations = HashMap::new();
        annotations.insert("warnings".to_string(), "not json".to_string());
        assert!(decode_warnings(&annotations).is_err());
    }
}
