use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Clip `text` to at most `max_chars` characters, appending a marker that
/// names how many characters were dropped.
pub fn clip_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... [truncated {} chars]", total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::{clip_chars, now_rfc3339};

    #[test]
    fn clip_is_identity_under_limit() {
        assert_eq!(clip_chars("hello", 10), "hello");
    }

    #[test]
    fn clip_appends_dropped_count() {
        let out = clip_chars("abcdefghij", 4);
        assert!(out.starts_with("abcd"));
        assert!(out.contains("[truncated 6 chars]"));
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }
}
