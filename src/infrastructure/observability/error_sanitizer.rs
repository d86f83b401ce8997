use regex::Regex;
use std::sync::LazyLock;

const MAX_VISIBLE_LENGTH: usize = 240;

static BEARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").unwrap());

/// Reduces an external failure to the single line exposed through
/// `get_status`: no newlines, no credentials, bounded length. Raw stack
/// traces and response bodies never leave the Ledger.
pub fn sanitize_error(raw: &str) -> String {
    let flattened: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();

    let mut collapsed = String::with_capacity(flattened.len());
    let mut prev_was_space = false;
    for ch in flattened.trim().chars() {
        if ch == ' ' {
            if !prev_was_space {
                collapsed.push(ch);
            }
            prev_was_space = true;
        } else {
            collapsed.push(ch);
            prev_was_space = false;
        }
    }

    let redacted = BEARER_TOKEN.replace_all(&collapsed, "bearer [REDACTED]");

    if redacted.is_empty() {
        return String::from("[EMPTY]");
    }

    if redacted.chars().count() > MAX_VISIBLE_LENGTH {
        let truncated: String = redacted.chars().take(MAX_VISIBLE_LENGTH).collect();
        format!("{}... ({} chars total)", truncated, redacted.chars().count())
    } else {
        redacted.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_multiline_error_when_sanitizing_then_output_is_single_line() {
        let raw = "request failed\n  at layer one\n  at layer two";
        let sanitized = sanitize_error(raw);
        assert!(!sanitized.contains('\n'));
        assert_eq!(sanitized, "request failed at layer one at layer two");
    }

    #[test]
    fn given_long_error_when_sanitizing_then_output_is_truncated() {
        let raw = "x".repeat(1000);
        let sanitized = sanitize_error(&raw);
        assert!(sanitized.chars().count() < 300);
        assert!(sanitized.contains("chars total"));
    }

    #[test]
    fn given_bearer_token_when_sanitizing_then_token_is_redacted() {
        let raw = "HTTP 401 with Bearer sk-abc123.def";
        let sanitized = sanitize_error(raw);
        assert!(!sanitized.contains("sk-abc123"));
        assert!(sanitized.contains("[REDACTED]"));
    }

    #[test]
    fn given_empty_error_when_sanitizing_then_placeholder_is_returned() {
        assert_eq!(sanitize_error("   "), "[EMPTY]");
    }
}
