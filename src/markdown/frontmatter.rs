//! YAML frontmatter parsing for primitive files.
//!
//! A frontmatter block is delimited by a line containing exactly `---` at
//! the start of the file and a second such line terminating it. The body is
//! everything after the closing delimiter, byte-for-byte.

use crate::error::ApmError;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed frontmatter: a string-keyed YAML mapping. Unknown keys are
/// preserved; callers pick out the fields they understand.
pub type Frontmatter = BTreeMap<String, serde_yml::Value>;

/// Split a Markdown document into `(frontmatter, body)`.
///
/// Files without a leading `---` line have empty frontmatter and the full
/// text as body. `path` is only used for error reporting.
pub fn split_frontmatter(text: &str, path: &Path) -> Result<(Frontmatter, String), ApmError> {
    let Some(rest) = strip_open_delimiter(text) else {
        return Ok((Frontmatter::new(), text.to_string()));
    };

    let Some((yaml, body)) = split_close_delimiter(rest) else {
        return Err(ApmError::MalformedFrontmatter {
            path: path.to_path_buf(),
            reason: "opening `---` has no closing `---`".to_string(),
        });
    };

    if yaml.trim().is_empty() {
        return Ok((Frontmatter::new(), body.to_string()));
    }

    let map: Frontmatter =
        serde_yml::from_str(yaml).map_err(|e| ApmError::MalformedFrontmatter {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok((map, body.to_string()))
}

/// Fetch a frontmatter field as a trimmed string, if present and scalar.
pub fn string_field(map: &Frontmatter, key: &str) -> Option<String> {
    match map.get(key)? {
        serde_yml::Value::String(s) => Some(s.trim().to_string()),
        serde_yml::Value::Number(n) => Some(n.to_string()),
        serde_yml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fetch a frontmatter field as a list of strings. A scalar value is
/// treated as a one-element list.
pub fn string_list_field(map: &Frontmatter, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(serde_yml::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect(),
        Some(serde_yml::Value::String(s)) => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn strip_open_delimiter(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("---")?;
    match rest.as_bytes().first() {
        Some(b'\n') => Some(&rest[1..]),
        Some(b'\r') if rest.as_bytes().get(1) == Some(&b'\n') => Some(&rest[2..]),
        _ => None,
    }
}

/// Find the closing `---` line; returns (yaml_text, body_after_delimiter).
fn split_close_delimiter(rest: &str) -> Option<(&str, &str)> {
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" {
            let body_start = offset + line.len();
            return Some((&rest[..offset], &rest[body_start..]));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("test.instructions.md")
    }

    #[test]
    fn parses_simple_frontmatter() {
        let text = "---\ndescription: Python rules\napplyTo: \"**/*.py\"\n---\nUse snake_case.\n";
        let (map, body) = split_frontmatter(text, &path()).unwrap();
        assert_eq!(
            string_field(&map, "description").as_deref(),
            Some("Python rules")
        );
        assert_eq!(string_field(&map, "applyTo").as_deref(), Some("**/*.py"));
        assert_eq!(body, "Use snake_case.\n");
    }

    #[test]
    fn no_delimiter_means_full_body() {
        let text = "Just a document.\n";
        let (map, body) = split_frontmatter(text, &path()).unwrap();
        assert!(map.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn body_is_byte_preserved() {
        let original_body = "line one\n\n  indented\ttabbed\nline ---\n";
        let text = format!("---\nname: x\n---\n{}", original_body);
        let (_, body) = split_frontmatter(&text, &path()).unwrap();
        assert_eq!(body, original_body);
    }

    #[test]
    fn unclosed_frontmatter_is_malformed() {
        let text = "---\ndescription: dangling\n";
        let err = split_frontmatter(text, &path()).unwrap_err();
        assert!(matches!(err, ApmError::MalformedFrontmatter { .. }));
    }

    #[test]
    fn bad_yaml_is_malformed() {
        let text = "---\ndescription: [unbalanced\n---\nbody\n";
        let err = split_frontmatter(text, &path()).unwrap_err();
        assert!(matches!(err, ApmError::MalformedFrontmatter { .. }));
    }

    #[test]
    fn unknown_keys_preserved() {
        let text = "---\ndescription: d\nx-custom: 42\n---\nbody\n";
        let (map, _) = split_frontmatter(text, &path()).unwrap();
        assert!(map.contains_key("x-custom"));
    }

    #[test]
    fn crlf_delimiters_accepted() {
        let text = "---\r\ndescription: d\r\n---\r\nbody\r\n";
        let (map, body) = split_frontmatter(text, &path()).unwrap();
        assert_eq!(string_field(&map, "description").as_deref(), Some("d"));
        assert_eq!(body, "body\r\n");
    }

    #[test]
    fn list_field_accepts_scalar_and_sequence() {
        let text = "---\nmcp:\n  - a\n  - b\ninput: one\n---\nbody\n";
        let (map, _) = split_frontmatter(text, &path()).unwrap();
        assert_eq!(string_list_field(&map, "mcp"), vec!["a", "b"]);
        assert_eq!(string_list_field(&map, "input"), vec!["one"]);
        assert!(string_list_field(&map, "absent").is_empty());
    }
}
