use serde_json::Value;

use crate::error::Result;

/// One decoded server-pushed payload.
///
/// The service sends `{"token": "..."}` objects.  Every other field is ignored, and a payload
/// that decodes to something other than an object simply carries nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// Answer text to append, if the payload carried a non-empty string token.
    pub token: Option<String>,

    /// Set when the payload carries an explicit `"done": true` completion marker.
    pub done: bool,
}

impl Fragment {
    /// Decodes a raw `data:` payload.
    ///
    /// Fails only when the payload is not valid JSON.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        let Value::Object(fields) = value else {
            return Ok(Self::default());
        };
        let token = match fields.get("token") {
            Some(Value::String(token)) if !token.is_empty() => Some(token.clone()),
            _ => None,
        };
        let done = matches!(fields.get("done"), Some(Value::Bool(true)));
        Ok(Self { token, done })
    }
}
