use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Parses a model reply into the operation's declared shape.
pub fn parse_shaped<T: DeserializeOwned>(response: &str, operation: &str) -> Result<T> {
    if response.trim().is_empty() {
        return Err(Error::upstream(format!("Empty reply for {}", operation)));
    }

    let json = extract_json(response).ok_or_else(|| {
        Error::Validation(format!("Reply for {} contained no JSON object", operation))
    })?;

    serde_json::from_str(json).map_err(|e| {
        Error::Validation(format!(
            "Reply for {} does not match the expected shape: {}",
            operation, e
        ))
    })
}

/// Locates the JSON object in a reply. Replies constrained by a schema are
/// bare JSON; older or chattier replies wrap it in a fence or prose.
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(fenced) = fenced_block(text) {
        if fenced.starts_with('{') {
            return Some(fenced);
        }
    }

    balanced_object(text)
}

/// Body of the first ``` fence, language tag skipped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")? + 3;
    let body_start = open + text[open..].find('\n')? + 1;
    let close = text[body_start..].find("```")?;
    Some(text[body_start..body_start + close].trim())
}

/// First brace-balanced `{...}` span, ignoring braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        match (in_string, escaped, c) {
            (true, true, _) => escaped = false,
            (true, false, '\\') => escaped = true,
            (_, _, '"') => in_string = !in_string,
            (false, _, '{') => depth += 1,
            (false, _, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Narrative;

    #[test]
    fn test_fenced_reply() {
        let input = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\n";
        assert_eq!(extract_json(input), Some(r#"{"summary": "ok"}"#));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let input = r#"Result: {"summary": "uses {braces} and \"quotes\"", "highlights": []} done"#;
        let narrative: Narrative = parse_shaped(input, "issues").unwrap();
        assert_eq!(narrative.summary, r#"uses {braces} and "quotes""#);
    }

    #[test]
    fn test_extract_raw_json_after_multibyte_text() {
        let input = r#"Résumé → {"summary": "ünïcode", "highlights": []} trailing"#;
        assert_eq!(
            extract_json(input),
            Some(r#"{"summary": "ünïcode", "highlights": []}"#)
        );
    }

    #[test]
    fn test_parse_shaped_accepts_matching_reply() {
        let narrative: Narrative =
            parse_shaped(r#"{"summary": "Busy tracker", "highlights": ["bugs"]}"#, "issues")
                .unwrap();
        assert_eq!(narrative.summary, "Busy tracker");
    }

    #[test]
    fn test_shape_mismatch_is_validation_error() {
        let err = parse_shaped::<Narrative>(r#"{"headline": "wrong"}"#, "issues").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err = parse_shaped::<Narrative>("I could not do that.", "issues").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_empty_reply_is_upstream_error() {
        let err = parse_shaped::<Narrative>("  ", "issues").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamApiError);
    }
}
