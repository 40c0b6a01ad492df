//! Constitution block: verbatim, hash-tagged inclusion of
//! `memory/constitution.md` at the top of the root output file.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Relative path of the constitution source file.
pub const CONSTITUTION_PATH: &str = "memory/constitution.md";

const BLOCK_BEGIN: &str = "<!-- SPEC-KIT CONSTITUTION: BEGIN -->";
const BLOCK_END: &str = "<!-- SPEC-KIT CONSTITUTION: END -->";

/// First 12 hex digits of the SHA-256 of `contents`.
pub fn constitution_hash(contents: &str) -> String {
    let digest = Sha256::digest(contents.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Render the delimited block around the verbatim file contents.
pub fn render_block(contents: &str) -> String {
    let hash = constitution_hash(contents);
    let mut block = String::new();
    block.push_str(BLOCK_BEGIN);
    block.push('\n');
    block.push_str(&format!("hash: {hash} path: {CONSTITUTION_PATH}\n"));
    block.push_str(contents);
    if !contents.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(BLOCK_END);
    block.push('\n');
    block
}

/// Build the block for the project, reusing the byte-identical block from
/// an existing output file when its recorded hash still matches. Returns
/// None when `memory/constitution.md` does not exist (not an error).
pub fn block_for_project(project_root: &Path, existing_output: Option<&str>) -> Option<String> {
    let path = project_root.join(CONSTITUTION_PATH);
    let contents = std::fs::read_to_string(path).ok()?;
    let hash = constitution_hash(&contents);

    if let Some(existing) = existing_output {
        if let Some(block) = extract_block(existing) {
            if block_hash(&block).as_deref() == Some(hash.as_str()) {
                return Some(block);
            }
        }
    }

    Some(render_block(&contents))
}

/// Pull an existing block (including both delimiters and the trailing
/// newline) out of a previously emitted file.
pub fn extract_block(output: &str) -> Option<String> {
    let start = output.find(BLOCK_BEGIN)?;
    let end_marker = output[start..].find(BLOCK_END)? + start + BLOCK_END.len();
    let end = if output[end_marker..].starts_with('\n') {
        end_marker + 1
    } else {
        end_marker
    };
    Some(output[start..end].to_string())
}

fn block_hash(block: &str) -> Option<String> {
    let line = block.lines().nth(1)?;
    let rest = line.strip_prefix("hash: ")?;
    let (hash, _) = rest.split_once(' ')?;
    Some(hash.to_string())
}
