use std::path::PathBuf;

use dirs_next::home_dir;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home().join(rest);
    }
    PathBuf::from(trimmed)
}

/// Fills `{name}` placeholders of a route template with percent-encoded values.
///
/// Resource identifiers contain `:` and `/`, so every value is encoded as a single
/// path segment. Placeholders without a value are left in place.
///
/// ```rust
/// use pipewatch_util::build_path;
///
/// let path = build_path("/stacks/{name}/events", &[("name", "arn:aws:x/y")]);
/// assert_eq!(path, "/stacks/arn%3Aaws%3Ax%2Fy/events");
/// ```
pub fn build_path(template: &str, variables: &[(&str, &str)]) -> String {
    let mut path = template.to_string();
    for (key, value) in variables {
        let encoded = utf8_percent_encode(value, NON_ALPHANUMERIC).to_string();
        path = path.replace(&format!("{{{}}}", key), &encoded);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_unknown_placeholders() {
        assert_eq!(build_path("/executions/{id}/{missing}", &[("id", "e-1")]), "/executions/e%2D1/{missing}");
    }

    #[test]
    fn plain_paths_are_untouched() {
        assert_eq!(expand_tilde(" ./pipeline.yaml "), PathBuf::from("./pipeline.yaml"));
    }
}
