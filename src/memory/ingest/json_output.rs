//! Decoding of JSON produced by language models.
//!
//! Models wrap JSON in markdown fences or surround it with prose. Decoding strips
//! fences, takes the text between the first `{` and the last `}`, then deserializes
//! into a typed shape. Failures are values, never panics.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Why a model response could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `{ ... }` span in the response.
    #[error("no JSON object found in model output")]
    NoJson,
    /// A JSON span was found but did not match the expected shape.
    #[error("malformed model JSON: {0}")]
    Malformed(String),
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````), if any.
#[must_use]
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };

    let after_fence = &trimmed[start + 3..];
    let body = after_fence
        .find('\n')
        .map_or(after_fence, |newline| &after_fence[newline + 1..]);

    body.find("```")
        .map_or(body, |close| &body[..close])
        .trim()
}

/// Slice from the first `{` to the last `}`.
#[must_use]
pub fn locate_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Decode a model response into `T`.
///
/// # Errors
/// Returns [`ParseError::NoJson`] when no object is present and
/// [`ParseError::Malformed`] when it does not deserialize into `T`.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let body = strip_code_fences(raw);
    let json = locate_json_object(body)
        .or_else(|| locate_json_object(raw))
        .ok_or(ParseError::NoJson)?;
    serde_json::from_str(json).map_err(|e| ParseError::Malformed(e.to_string()))
}

/// Decode a model response, degrading to `T::default()` with a warning.
#[must_use]
pub fn parse_or_default<T: DeserializeOwned + Default>(raw: &str, what: &str) -> T {
    match parse_model_json(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(%err, "Unusable model output for {what}; using empty result");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Names {
        names: Vec<String>,
    }

    #[test]
    fn decodes_fenced_json() {
        let raw = "Sure!\n```json\n{\"names\": [\"Alice\"]}\n```\nDone.";
        let parsed: Names = parse_model_json(raw).unwrap();
        assert_eq!(parsed.names, vec!["Alice".to_string()]);
    }

    #[test]
    fn decodes_json_inside_prose() {
        let raw = "Here you go: {\"names\": [\"Bob\", \"Carol\"]} hope that helps";
        let parsed: Names = parse_model_json(raw).unwrap();
        assert_eq!(parsed.names.len(), 2);
    }

    #[test]
    fn reports_missing_and_malformed_json() {
        assert_eq!(parse_model_json::<Names>("no json here"), Err(ParseError::NoJson));
        assert!(matches!(
            parse_model_json::<Names>("{\"names\": 3}"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn parse_or_default_degrades_to_empty() {
        let parsed: Names = parse_or_default("{oops", "test");
        assert_eq!(parsed, Names::default());
    }
}
