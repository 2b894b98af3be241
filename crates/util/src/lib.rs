use once_cell::sync::Lazy;
use regex::Regex;

pub mod async_runtime;
pub mod paths;
pub mod time_format;
pub mod timing;

pub use async_runtime::block_on_future;
pub use paths::{build_path, expand_tilde};
pub use timing::{Clock, ManualClock, Sleeper, SystemClock, ThreadSleeper};

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern compiles"))
    .collect()
});

static SENSITIVE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(key|token|secret|password)").expect("sensitive key pattern compiles"));

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in REDACT_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Value safe to log for a named parameter.
pub fn redact_parameter<'a>(key: &str, value: &'a str) -> &'a str {
    if SENSITIVE_KEY.is_match(key) { "<redacted>" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_inline_secrets() {
        assert_eq!(redact_sensitive("Authorization: Bearer123"), "Authorization: <redacted>");
        assert_eq!(redact_sensitive("API_TOKEN=abc rest"), "API_TOKEN=<redacted> rest");
    }

    #[test]
    fn redacts_sensitive_parameter_values() {
        assert_eq!(redact_parameter("ApiKey", "abc"), "<redacted>");
        assert_eq!(redact_parameter("ResourcePrefix", "CID-DC-"), "CID-DC-");
    }
}
