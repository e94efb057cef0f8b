/// A JSON document (`std::json`), kept as its string representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Json(pub(crate) String);

impl Json {
    /// Wrap a string that is known to contain valid JSON.
    ///
    /// Used by decoders after the server vouched for the payload; use
    /// `TryFrom<String>` for untrusted data.
    pub fn new_unchecked(value: String) -> Json {
        Json(value)
    }
}

impl TryFrom<String> for Json {
    type Error = serde_json::Error;
    fn try_from(value: String) -> Result<Json, Self::Error> {
        serde_json::from_str::<serde::de::IgnoredAny>(&value)?;
        Ok(Json(value))
    }
}

impl From<Json> for String {
    fn from(value: Json) -> String {
        value.0
    }
}

impl std::ops::Deref for Json {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Json {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
