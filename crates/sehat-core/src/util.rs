//! Small text helpers shared by config, sync and cache code.

const EXCERPT_CHARS: usize = 180;

/// Trim optional text, mapping blank values to `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether `value` carries an `http://` or `https://` scheme (any case).
pub fn has_http_scheme(value: &str) -> bool {
    scheme_len(value).is_some()
}

/// Normalize a service base URL: trimmed, http(s) with a host, no trailing
/// slash. `None` if the value is not usable.
pub fn base_url(value: &str) -> Option<String> {
    let value = value.trim();
    let host_start = scheme_len(value)?;
    let trimmed = value.trim_end_matches('/');
    if trimmed.len() <= host_start {
        return None;
    }
    Some(trimmed.to_string())
}

/// Single-line excerpt of a response body for error messages.
pub fn excerpt(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(EXCERPT_CHARS)
        .collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn scheme_len(value: &str) -> Option<usize> {
    ["http://", "https://"].into_iter().find_map(|scheme| {
        value
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| scheme.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_none() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" 1.2.0 ".to_string())).as_deref(),
            Some("1.2.0")
        );
    }

    #[test]
    fn base_url_requires_scheme_and_host() {
        assert_eq!(
            base_url(" https://sync.sehatlink.in/ ").as_deref(),
            Some("https://sync.sehatlink.in")
        );
        assert_eq!(
            base_url("HTTP://localhost:8080").as_deref(),
            Some("HTTP://localhost:8080")
        );
        assert_eq!(base_url("https://"), None);
        assert_eq!(base_url("sync.sehatlink.in"), None);
        assert_eq!(base_url("ftp://sync.sehatlink.in"), None);
    }

    #[test]
    fn scheme_check_ignores_relative_paths() {
        assert!(has_http_scheme("https://cdn.example.org/logo.png"));
        assert!(!has_http_scheme("/health-tips"));
        assert!(!has_http_scheme("ht"));
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("  bad\n\n gateway  "), "bad gateway");
        assert_eq!(excerpt(&"x".repeat(500)).len(), EXCERPT_CHARS);
    }
}
