//! Package shape validation.
//!
//! A directory is a valid APM package iff it carries a parseable manifest
//! and ships at least one primitive: a non-empty `.apm/` tree or a workflow
//! file near the root.

use crate::error::ApmError;
use crate::manifest::Manifest;
use crate::primitives::{discover_primitives, DiscoveryOutcome, DiscoveryRoot, PrimitiveSource};
use std::path::{Path, PathBuf};

/// A validated package rooted at `root_path`.
#[derive(Debug, Clone)]
pub struct ApmPackage {
    pub manifest: Manifest,
    pub root_path: PathBuf,
}

impl ApmPackage {
    /// Discover the package's primitives, tagging them with `source`.
    pub fn discover(&self, source: PrimitiveSource) -> DiscoveryOutcome {
        discover_primitives(&[DiscoveryRoot {
            path: self.root_path.clone(),
            source,
        }])
    }
}

/// Maximum depth at which root workflows still qualify a package.
const WORKFLOW_SEARCH_DEPTH: usize = 2;

/// Validate that `dir` is an APM package and return it.
pub fn validate_package(dir: &Path) -> Result<ApmPackage, ApmError> {
    let manifest = Manifest::load(dir)?;

    if !has_primitive_content(dir) {
        return Err(ApmError::EmptyPackage {
            path: dir.to_path_buf(),
        });
    }

    Ok(ApmPackage {
        manifest,
        root_path: dir.to_path_buf(),
    })
}

fn has_primitive_content(dir: &Path) -> bool {
    let apm_dir = dir.join(".apm");
    if apm_dir.is_dir() && tree_has_file(&apm_dir) {
        return true;
    }
    has_workflow_within(dir, WORKFLOW_SEARCH_DEPTH)
}

fn tree_has_file(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() {
            return true;
        }
        if file_type.is_dir() && tree_has_file(&entry.path()) {
            return true;
        }
    }
    false
}

fn has_workflow_within(dir: &Path, depth: usize) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if file_type.is_file() && name.ends_with(".prompt.md") {
            return true;
        }
        if file_type.is_dir()
            && depth > 0
            && !name.starts_with('.')
            && name != "apm_modules"
            && name != "node_modules"
            && has_workflow_within(&entry.path(), depth - 1)
        {
            return true;
        }
    }
    false
}
