use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+$").expect("valid version suffix regex"));

/// Normalizes a user-supplied base URL for OpenAI-compatible endpoints. A
/// trailing `#` opts out of normalization; otherwise a missing `/v1` segment
/// is appended.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    if !VERSION_SUFFIX_RE.is_match(trimmed) && !trimmed.contains("/v1") {
        let without_slash = trimmed.trim_end_matches('/');
        format!("{}/v1", without_slash)
    } else {
        trimmed.to_string()
    }
}
