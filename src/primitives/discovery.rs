//! Primitive discovery: walk roots, classify, parse, validate, collect.

use crate::error::{ApmError, ValidationWarning};
use crate::markdown::frontmatter::{split_frontmatter, string_field, string_list_field};
use crate::primitives::{
    Chatmode, ContextFile, Instruction, PrimitiveCollection, PrimitiveKind, PrimitiveSource,
    Workflow,
};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One root to scan, with the source tag applied to everything under it.
#[derive(Debug, Clone)]
pub struct DiscoveryRoot {
    pub path: PathBuf,
    pub source: PrimitiveSource,
}

/// Result of a discovery pass: the collection plus non-fatal warnings.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub collection: PrimitiveCollection,
    pub warnings: Vec<ValidationWarning>,
}

/// Hidden directories the walker is allowed to descend into.
const FOLLOWED_HIDDEN_DIRS: &[&str] = &[".apm", ".github"];

/// Directory names never scanned for primitives.
const PRUNED_DIRS: &[&str] = &[".git", "apm_modules", "node_modules"];

/// Walk `roots` in order and collect every valid primitive.
///
/// Locals shadow dependency primitives with the same kind and root-relative
/// path; among dependencies the first-seen root wins. A malformed file
/// records a warning and never aborts the walk.
pub fn discover_primitives(roots: &[DiscoveryRoot]) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome::default();
    // Keyed by (kind, root-relative path); BTreeMap iteration order is the
    // collection order downstream output depends on.
    let mut entries: BTreeMap<(PrimitiveKind, String), Candidate> = BTreeMap::new();

    for root in roots {
        if !root.path.is_dir() {
            continue;
        }
        for (path, kind) in walk_primitive_files(&root.path) {
            let rel = path
                .strip_prefix(&root.path)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let key = (kind, rel);
            if let Some(existing) = entries.get(&key) {
                debug!(
                    path = %path.display(),
                    shadowed_by = %existing.path.display(),
                    "primitive shadowed by earlier source"
                );
                continue;
            }
            entries.insert(
                key,
                Candidate {
                    path,
                    source: root.source.clone(),
                },
            );
        }
    }

    for ((kind, _rel), candidate) in entries {
        match load_primitive(kind, &candidate.path, candidate.source) {
            Ok(parsed) => match parsed {
                Parsed::Chatmode(p) => outcome.collection.chatmodes.push(p),
                Parsed::Instruction(p) => outcome.collection.instructions.push(p),
                Parsed::Context(p) => outcome.collection.contexts.push(p),
                Parsed::Workflow(p) => outcome.collection.workflows.push(p),
            },
            Err(warning) => {
                debug!(path = %warning.path.display(), reason = %warning.reason, "skipping primitive");
                outcome.warnings.push(warning);
            }
        }
    }

    outcome
}

struct Candidate {
    path: PathBuf,
    source: PrimitiveSource,
}

enum Parsed {
    Chatmode(Chatmode),
    Instruction(Instruction),
    Context(ContextFile),
    Workflow(Workflow),
}

/// Deterministic walk yielding `(path, kind)` for every primitive file.
fn walk_primitive_files(root: &Path) -> Vec<(PathBuf, PrimitiveKind)> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if PRUNED_DIRS.iter().any(|p| *p == name) {
                    return false;
                }
                if name.starts_with('.') {
                    return FOLLOWED_HIDDEN_DIRS.iter().any(|h| *h == name);
                }
                return true;
            }
            !name.starts_with('.')
        })
        .build();

    for entry in walker.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(kind) = PrimitiveKind::from_file_name(&name) {
            files.push((entry.into_path(), kind));
        }
    }
    files
}

fn load_primitive(
    kind: PrimitiveKind,
    path: &Path,
    source: PrimitiveSource,
) -> Result<Parsed, ValidationWarning> {
    let text = std::fs::read_to_string(path).map_err(|e| ValidationWarning {
        path: path.to_path_buf(),
        reason: format!("unreadable: {e}"),
    })?;
    let (frontmatter, body) = split_frontmatter(&text, path).map_err(|e| ValidationWarning {
        path: path.to_path_buf(),
        reason: match e {
            ApmError::MalformedFrontmatter { reason, .. } => {
                format!("malformed frontmatter: {reason}")
            }
            other => other.to_string(),
        },
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name =
        string_field(&frontmatter, "name").unwrap_or_else(|| kind.strip_suffix(&file_name));
    let description = string_field(&frontmatter, "description");
    let body_empty = body.trim().is_empty();

    let skip = |reason: &str| ValidationWarning {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    match kind {
        PrimitiveKind::Chatmode => {
            let description = description
                .filter(|d| !d.is_empty())
                .ok_or_else(|| skip("chatmode requires a non-empty `description`"))?;
            if body_empty {
                return Err(skip("chatmode requires a non-empty body"));
            }
            Ok(Parsed::Chatmode(Chatmode {
                name,
                description,
                apply_to: string_field(&frontmatter, "applyTo").filter(|p| !p.is_empty()),
                author: string_field(&frontmatter, "author"),
                version: string_field(&frontmatter, "version"),
                body,
                source_path: path.to_path_buf(),
                source,
            }))
        }
        PrimitiveKind::Instruction => {
            let description = description
                .filter(|d| !d.is_empty())
                .ok_or_else(|| skip("instruction requires a non-empty `description`"))?;
            let apply_to = string_field(&frontmatter, "applyTo")
                .filter(|p| !p.is_empty())
                .ok_or_else(|| skip("instruction requires a non-empty `applyTo` pattern"))?;
            if body_empty {
                return Err(skip("instruction requires a non-empty body"));
            }
            Ok(Parsed::Instruction(Instruction {
                name,
                description,
                apply_to,
                author: string_field(&frontmatter, "author"),
                version: string_field(&frontmatter, "version"),
                body,
                source_path: path.to_path_buf(),
                source,
            }))
        }
        PrimitiveKind::Context => {
            if body_empty {
                return Err(skip("context requires a non-empty body"));
            }
            Ok(Parsed::Context(ContextFile {
                name,
                description,
                body,
                source_path: path.to_path_buf(),
                source,
            }))
        }
        PrimitiveKind::Workflow => {
            if body_empty {
                return Err(skip("workflow requires a non-empty body"));
            }
            Ok(Parsed::Workflow(Workflow {
                name,
                description,
                mode: string_field(&frontmatter, "mode"),
                input: string_list_field(&frontmatter, "input"),
                mcp: string_list_field(&frontmatter, "mcp"),
                body,
                source_path: path.to_path_buf(),
                source,
            }))
        }
    }
}
