//! Sanitizing command output and response bodies before they reach logs and
//! reports.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length (in characters) of a detail string in a step result.
pub const MAX_DETAIL_LEN: usize = 512;

/// Regex pattern for JWT tokens (header.payload.signature).
#[allow(clippy::expect_used)] // literal pattern, exercised by tests
static JWT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]*)?")
        .expect("JWT pattern is valid")
});

/// Regex pattern for credential assignments such as `password=...`,
/// `"apiKey": "..."` or `MYSQL_ROOT_PASSWORD: ...`.
#[allow(clippy::expect_used)] // literal pattern, exercised by tests
static CREDENTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:password|secret|api_?key|token)"?\s*[:=]\s*"?)[^\s",}]+"#)
        .expect("credential pattern is valid")
});

/// Redact credentials and tokens, keeping everything else intact.
///
/// Credential assignments are redacted first so that `token=<JWT>` is replaced
/// as a whole.
pub fn redact(text: &str) -> String {
    let redacted = CREDENTIAL_PATTERN.replace_all(text, "${1}[REDACTED]");
    JWT_PATTERN.replace_all(&redacted, "[JWT_REDACTED]").into_owned()
}

/// [`redact`], then truncate to [`MAX_DETAIL_LEN`].
pub fn sanitize_detail(text: &str) -> String {
    truncate(redact(text).trim(), MAX_DETAIL_LEN)
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            let head = text.get(..byte_index).unwrap_or(text);
            format!("{head}...[truncated]")
        }
        None => text.to_string(),
    }
}

/// Keep only the last `lines` lines of `text`.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    all.into_iter().skip(skip).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_password_assignments() {
        let out = sanitize_detail("MYSQL_ROOT_PASSWORD=hunter2 started");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn test_redacts_json_api_key() {
        let out = sanitize_detail(r#"{"connectorId": "c-1", "apiKey": "sk-abc123"}"#);
        assert!(!out.contains("sk-abc123"));
        assert!(out.contains("c-1"));
    }

    #[test]
    fn test_redacts_bare_jwt() {
        let out = sanitize_detail("got eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig back");
        assert!(out.contains("[JWT_REDACTED]"));
        assert!(!out.contains("eyJzdWIi"));
    }

    #[test]
    fn test_truncates_long_detail() {
        let long = "x".repeat(MAX_DETAIL_LEN + 10);
        let out = sanitize_detail(&long);
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.len(), MAX_DETAIL_LEN + "...[truncated]".len());
    }

    #[test]
    fn test_redact_keeps_full_log_text() {
        let mut logs = "mysql | ready for connections\n".repeat(40);
        logs.push_str("mysql | MYSQL_ROOT_PASSWORD: hunter2");
        let out = redact(&logs);
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("[truncated]"));
        assert!(out.len() > MAX_DETAIL_LEN);
        assert_eq!(out.lines().count(), 41);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééé", 2), "éé...[truncated]");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_tail_lines_keeps_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail_lines("a\nb", 10), "a\nb");
    }
}
