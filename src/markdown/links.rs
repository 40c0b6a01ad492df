//! Relative Markdown link rewriting.
//!
//! Instruction bodies are authored next to their source file but emitted
//! into an `AGENTS.md` somewhere else in the tree. Relative links are
//! rewritten so they still resolve from the emitted file's directory.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("static regex"))
}

/// Rewrite `[text](path)` links in `body` authored relative to
/// `source_dir` so they resolve from `target_dir`. Absolute URLs, anchors,
/// and absolute paths are left untouched.
pub fn rewrite_relative_links(body: &str, source_dir: &Path, target_dir: &Path) -> String {
    if source_dir == target_dir {
        return body.to_string();
    }
    link_regex()
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let text = &caps[1];
            let dest = &caps[2];
            if !is_rewritable(dest) {
                return caps[0].to_string();
            }
            let absolute = normalize(&source_dir.join(dest));
            let rewritten = relative_from(&absolute, target_dir);
            format!("[{}]({})", text, rewritten.to_string_lossy().replace('\\', "/"))
        })
        .into_owned()
}

fn is_rewritable(dest: &str) -> bool {
    if dest.starts_with('#') || dest.starts_with('/') {
        return false;
    }
    // Scheme-qualified destinations (http:, https:, mailto:) stay as-is.
    if let Some(colon) = dest.find(':') {
        if !dest[..colon].contains('/') {
            return false;
        }
    }
    true
}

/// Lexically normalize `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Express `path` relative to `base` using `..` segments where needed.
fn relative_from(path: &Path, base: &Path) -> PathBuf {
    let path_components: Vec<_> = normalize(path).components().map(|c| c.as_os_str().to_owned()).collect();
    let base_components: Vec<_> = normalize(base).components().map(|c| c.as_os_str().to_owned()).collect();

    let common = path_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_components.len() {
        out.push("..");
    }
    for component in &path_components[common..] {
        out.push(component);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
