//! Text helpers shared by the lifecycle controller and the template scheduler.

/// Truncate `input` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
#[must_use]
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    let trimmed = input.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Return the first balanced `{ ... }` object embedded in free text.
///
/// Braces inside JSON string literals are ignored, so a reasoning string
/// containing `}` does not end the object early. Returns `None` when no
/// opening brace is found or the object never closes.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
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
    use super::*;

    #[test]
    fn test_truncate_short_input_untouched() {
        assert_eq!(truncate_chars("  short  ", 10), "short");
    }

    #[test]
    fn test_truncate_long_input() {
        let out = truncate_chars("abcdefghij", 5);
        assert_eq!(out.chars().count(), 5);
        assert!(out.ends_with('…'));
        assert!(out.starts_with("abcd"));
    }

    #[test]
    fn test_extract_object_from_prose() {
        let text = "Sure! Here you go: {\"a\": 1, \"b\": {\"c\": 2}} hope that helps {\"x\": 3}";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1, \"b\": {\"c\": 2}}"));
    }

    #[test]
    fn test_extract_ignores_braces_in_strings() {
        let text = r#"{"reasoning": "use } carefully \" {", "ok": true} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"reasoning": "use } carefully \" {", "ok": true}"#)
        );
    }

    #[test]
    fn test_extract_unbalanced() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"open\": true"), None);
    }
}
