//! Decoding of client-to-server payloads

use crate::error::FramingError;
use serde_json::Value;

/// Decode a message payload into logical frames
///
/// Send endpoints carry a JSON array of strings. WebSocket messages may also
/// carry a single JSON string. Other well-formed JSON is a missing payload.
pub fn decode_messages(payload: &str) -> Result<Vec<String>, FramingError> {
    if payload.trim().is_empty() {
        return Err(FramingError::PayloadExpected);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(message) => Ok(message),
                _ => Err(FramingError::BrokenJson),
            })
            .collect(),
        Ok(Value::String(message)) => Ok(vec![message]),
        Ok(_) => Err(FramingError::PayloadExpected),
        Err(_) => Err(FramingError::BrokenJson),
    }
}

/// Extract the payload of a JSONP send request
///
/// Form posts carry the payload in the `d` field; any other content type is
/// the payload itself.
pub fn decode_form_payload(
    body: &[u8],
    content_type: Option<&str>,
) -> Result<String, FramingError> {
    let is_form = content_type
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    if is_form {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "d")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or(FramingError::PayloadExpected)
    } else {
        String::from_utf8(body.to_vec()).map_err(|_| FramingError::BrokenJson)
    }
}

/// Validate a JSONP / htmlfile callback name
pub fn validate_callback(callback: Option<&str>) -> Result<&str, FramingError> {
    let callback = callback
        .filter(|cb| !cb.is_empty())
        .ok_or(FramingError::CallbackRequired)?;

    if callback
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        Ok(callback)
    } else {
        Err(FramingError::InvalidCallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_array() {
        assert_eq!(
            decode_messages(r#"["a","b"]"#).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(decode_messages("[]").unwrap(), Vec::<String>::new());
        assert_eq!(decode_messages(r#""solo""#).unwrap(), vec!["solo".to_string()]);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert_eq!(decode_messages(""), Err(FramingError::PayloadExpected));
        assert_eq!(decode_messages("  "), Err(FramingError::PayloadExpected));
        assert_eq!(decode_messages("[\"x\""), Err(FramingError::BrokenJson));
        assert_eq!(decode_messages("[1,2]"), Err(FramingError::BrokenJson));
        assert_eq!(decode_messages("{}"), Err(FramingError::PayloadExpected));
    }

    #[test]
    fn test_form_payload() {
        let body = b"d=%5B%22x%22%5D";
        assert_eq!(
            decode_form_payload(body, Some("application/x-www-form-urlencoded")).unwrap(),
            r#"["x"]"#
        );
        assert_eq!(
            decode_form_payload(b"d=", Some("application/x-www-form-urlencoded")),
            Err(FramingError::PayloadExpected)
        );
        assert_eq!(
            decode_form_payload(br#"["raw"]"#, Some("text/plain")).unwrap(),
            r#"["raw"]"#
        );
    }

    #[test]
    fn test_callback_validation() {
        assert_eq!(validate_callback(Some("cb_1.x")), Ok("cb_1.x"));
        assert_eq!(validate_callback(None), Err(FramingError::CallbackRequired));
        assert_eq!(validate_callback(Some("")), Err(FramingError::CallbackRequired));
        assert_eq!(
            validate_callback(Some("alert(1)")),
            Err(FramingError::InvalidCallback)
        );
    }
}
