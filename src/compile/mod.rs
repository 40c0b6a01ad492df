//! Compilation pipeline: discover primitives, analyze the project tree,
//! optimize placements, and emit context files.

pub mod analysis;
pub mod constitution;
pub mod emitter;
pub mod optimizer;

use crate::deps::MODULES_DIR;
use crate::error::{ApmError, ValidationWarning};
use crate::manifest::Manifest;
use crate::primitives::{
    discover_primitives, DiscoveryRoot, PrimitiveCollection, PrimitiveSource,
};
use analysis::DirectoryIndex;
use emitter::{EmitReport, EmitSettings};
use optimizer::{optimize_placements, PlacementMetrics};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// CLI-level overrides layered on the manifest's compilation config.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub output: Option<String>,
    pub chatmode: Option<String>,
    pub dry_run: bool,
    /// Disable relative link rewriting regardless of the manifest.
    pub no_links: bool,
    /// Tri-state constitution override; None defers to the manifest.
    pub constitution: Option<bool>,
}

/// Everything one compile run produced.
#[derive(Debug)]
pub struct CompileReport {
    pub primitives: usize,
    pub instructions: usize,
    pub warnings: Vec<ValidationWarning>,
    pub metrics: Vec<PlacementMetrics>,
    pub emit: EmitReport,
    pub dry_run: bool,
}

/// Discovery roots for a project: the local tree first, then each
/// installed dependency in sorted `owner/repo` order.
pub fn discovery_roots(project_root: &Path) -> Vec<DiscoveryRoot> {
    let mut roots = vec![DiscoveryRoot {
        path: project_root.to_path_buf(),
        source: PrimitiveSource::Local,
    }];
    let modules = project_root.join(MODULES_DIR);
    for (key, path) in installed_packages(&modules) {
        roots.push(DiscoveryRoot {
            path,
            source: PrimitiveSource::Dependency(key),
        });
    }
    roots
}

/// Installed `(owner/repo, path)` pairs, sorted by key.
pub fn installed_packages(modules_root: &Path) -> Vec<(String, PathBuf)> {
    let mut packages = Vec::new();
    let Ok(owners) = std::fs::read_dir(modules_root) else {
        return packages;
    };
    for owner in owners.flatten() {
        if !owner.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let owner_name = owner.file_name().to_string_lossy().to_string();
        if owner_name.starts_with('.') {
            continue;
        }
        let Ok(repos) = std::fs::read_dir(owner.path()) else {
            continue;
        };
        for repo in repos.flatten() {
            if !repo.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let repo_name = repo.file_name().to_string_lossy().to_string();
            packages.push((format!("{owner_name}/{repo_name}"), repo.path()));
        }
    }
    packages.sort();
    packages
}

/// Run discovery only; used by `compile --validate`.
pub fn validate_project(project_root: &Path) -> (PrimitiveCollection, Vec<ValidationWarning>) {
    let outcome = discover_primitives(&discovery_roots(project_root));
    (outcome.collection, outcome.warnings)
}

/// Full compile: discovery, analysis, placement, emission.
pub fn compile_project(
    project_root: &Path,
    options: &CompileOptions,
) -> Result<CompileReport, ApmError> {
    let manifest = Manifest::load(project_root)?;
    let compilation = &manifest.compilation;

    let discovery = discover_primitives(&discovery_roots(project_root));
    for warning in &discovery.warnings {
        warn!(path = %warning.path.display(), reason = %warning.reason, "primitive skipped");
    }
    let collection = discovery.collection;

    let settings = EmitSettings {
        output_name: options
            .output
            .clone()
            .unwrap_or_else(|| compilation.output.clone()),
        resolve_links: !options.no_links && compilation.resolve_links,
        constitution: options.constitution.unwrap_or(compilation.constitution),
        clean_orphaned: compilation.placement.clean_orphaned,
        dry_run: options.dry_run,
    };

    let index = DirectoryIndex::build(project_root, &compilation.placement, &settings.output_name);
    let outcome = optimize_placements(
        &collection.instructions,
        &index,
        &compilation.optimization,
    )?;

    let chatmode_name = options
        .chatmode
        .clone()
        .or_else(|| compilation.chatmode.clone());
    let chatmode = chatmode_name.as_deref().and_then(|name| {
        let found = collection.chatmode(name);
        if found.is_none() {
            warn!(chatmode = name, "configured chatmode not found");
        }
        found
    });

    let emit = emitter::emit(
        project_root,
        &outcome,
        &collection.instructions,
        chatmode,
        &settings,
    )?;

    info!(
        instructions = collection.instructions.len(),
        files = emit.planned(),
        dry_run = options.dry_run,
        "compile complete"
    );

    Ok(CompileReport {
        primitives: collection.total(),
        instructions: collection.instructions.len(),
        warnings: discovery.warnings,
        metrics: outcome.metrics,
        emit,
        dry_run: options.dry_run,
    })
}
