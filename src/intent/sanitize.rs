//! Recovering structured records from raw model text.
//!
//! Models are asked for bare JSON but regularly wrap it in commentary or
//! a ```` ```json ```` fence. [`parse`] tries the text as-is first, then
//! the interior of the first fenced block, and gives up quietly.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse `raw` into a JSON object, falling back to the first fenced block.
///
/// Returns `None` when neither pass yields an object. Never panics.
pub fn parse(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) if v.is_object() => return Some(v),
        Ok(_) => {}
        Err(e) => tracing::trace!(error = %e, "raw model text is not JSON"),
    }

    let inner = extract_fenced(raw)?;
    match serde_json::from_str::<Value>(inner.trim()) {
        Ok(v) if v.is_object() => Some(v),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "fenced block is not JSON either");
            None
        }
    }
}

/// [`parse`], then decode the object into `T`.
pub fn parse_as<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let value = parse(raw)?;
    match serde_json::from_value(value) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::debug!(error = %e, "JSON object does not match the expected shape");
            None
        }
    }
}

/// Return the interior of the first fenced code block in `reply`.
///
/// A ```` ```json ```` tagged fence is preferred over an untagged one.
/// An unterminated fence yields everything after the opening marker.
pub fn extract_fenced(reply: &str) -> Option<&str> {
    let after_open = if let Some(pos) = reply.find("```json") {
        &reply[pos + "```json".len()..]
    } else {
        let pos = reply.find("```")?;
        &reply[pos + 3..]
    };
    let inner = match after_open.find("```") {
        Some(close) => &after_open[..close],
        None => after_open,
    };
    Some(inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_passes_through() {
        let v = parse(r#"{"summary": "hi", "detected_date": null}"#).unwrap();
        assert_eq!(v["summary"], "hi");
        assert!(v["detected_date"].is_null());
    }

    #[test]
    fn json_tagged_fence_with_commentary() {
        let input = "Sure! Here it is:\n```json\n{\"target_name\": \"Ayşe\"}\n```\nAnything else?";
        assert_eq!(parse(input).unwrap()["target_name"], "Ayşe");
    }

    #[test]
    fn untagged_fence() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(parse(input).unwrap()["a"], 1);
    }

    #[test]
    fn crlf_line_endings() {
        let input = "```json\r\n{\"a\": 1}\r\n```";
        assert_eq!(parse(input).unwrap()["a"], 1);
    }

    #[test]
    fn plain_text_yields_none() {
        assert!(parse("I could not understand the mail.").is_none());
        assert!(extract_fenced("no fences here").is_none());
    }

    #[test]
    fn broken_json_in_fence_yields_none() {
        assert!(parse("```json\n{\"a\": \n```").is_none());
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(parse("[1, 2, 3]").is_none());
        assert!(parse("```json\n\"just a string\"\n```").is_none());
    }

    #[test]
    fn braces_inside_strings_survive() {
        let input = "```json\n{\"draft_text\": \"hello { world }\"}\n```";
        assert_eq!(parse(input).unwrap()["draft_text"], "hello { world }");
    }
}
