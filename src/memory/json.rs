//! Best-effort structured decode of LLM output.
//!
//! Models wrap JSON in markdown fences or surround it with prose. Decoding
//! tries, in order: the whole text, the body of a code fence, then the first
//! balanced `{...}` block. Anything else yields `None`.

use serde::de::DeserializeOwned;

/// Decode a JSON object from possibly noisy LLM text.
pub fn decode_json_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(inner) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str(inner)
    {
        return Some(value);
    }

    first_balanced_object(trimmed).and_then(|block| serde_json::from_str(block).ok())
}

/// Body of the first ```json or bare ``` fence.
fn fenced_block(text: &str) -> Option<&str> {
    let (start, skip) = match text.find("```json") {
        Some(start) => (start, 7),
        None => (text.find("```")?, 3),
    };
    let after = &text[start + skip..];
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// The first `{...}` block whose braces balance, ignoring braces inside
/// string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn decodes_direct_object() {
        let value: Value = decode_json_object(r#"{"intent": "general_context"}"#).unwrap();
        assert_eq!(value["intent"], "general_context");
    }

    #[test]
    fn decodes_markdown_fence() {
        let raw = "Here you go:\n```json\n{\"intent\": \"count_by_time\"}\n```";
        let value: Value = decode_json_object(raw).unwrap();
        assert_eq!(value["intent"], "count_by_time");
    }

    #[test]
    fn decodes_bare_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        let value: Value = decode_json_object(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn decodes_first_balanced_block_amid_prose() {
        let raw = "Result: {\"a\": {\"b\": 2}} and then {\"c\": 3} trailing";
        let value: Value = decode_json_object(raw).unwrap();
        assert_eq!(value["a"]["b"], 2);
        assert!(value.get("c").is_none());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_balancing() {
        let raw = "noise {\"text\": \"a } tricky { value\", \"n\": 1} more";
        let value: Value = decode_json_object(raw).unwrap();
        assert_eq!(value["text"], "a } tricky { value");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let raw = "x {\"q\": \"say \\\"hi\\\" }\"} y";
        let value: Value = decode_json_object(raw).unwrap();
        assert_eq!(value["q"], "say \"hi\" }");
    }

    #[test]
    fn empty_and_garbage_yield_none() {
        assert!(decode_json_object::<Value>("").is_none());
        assert!(decode_json_object::<Value>("   ").is_none());
        assert!(decode_json_object::<Value>("no json here").is_none());
        assert!(decode_json_object::<Value>("{ unclosed").is_none());
    }

    #[test]
    fn typed_decode_mismatch_yields_none() {
        #[derive(Debug, serde::Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            summary: String,
        }
        assert!(decode_json_object::<Needs>(r#"{"other": 1}"#).is_none());
    }
}
