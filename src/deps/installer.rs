//! Installer: orchestrates graph resolution and archive fetches into the
//! `apm_modules/` tree.
//!
//! Fetches within one topological level run concurrently, bounded by a
//! semaphore. Every node lands in a private staging directory and is swapped
//! into place with atomic renames, so partial failures never corrupt
//! neighbours. The lock file is written last.

use crate::deps::fetcher::{with_retries, PackageSource};
use crate::deps::graph::{build_graph, DependencyGraph, DependencyNode, GraphLimits};
use crate::deps::lockfile::{LockFile, LockRecord};
use crate::deps::{LOCK_FILE, MODULES_DIR};
use crate::error::ApmError;
use crate::manifest::Manifest;
use crate::package::validate_package;
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// What happened to one node during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    /// Fresh install into an empty slot.
    Installed,
    /// Existing tree replaced with a new SHA.
    Updated,
    /// Existing tree already matches the resolved SHA.
    Skipped,
}

impl InstallAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

/// Per-node outcome in install order.
#[derive(Debug, Clone)]
pub struct InstallEntry {
    pub key: String,
    pub ref_requested: Option<String>,
    pub resolved_sha: String,
    pub action: InstallAction,
}

/// Result of one install run.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub entries: Vec<InstallEntry>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

impl InstallReport {
    pub fn installed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.action != InstallAction::Skipped)
            .count()
    }
}

/// Installer options; defaults follow the command-line defaults.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub update: bool,
    pub dry_run: bool,
    pub max_parallel: usize,
    pub limits: GraphLimits,
    /// Restrict updates to one `owner/repo`; other installed nodes are
    /// left alone (missing ones are still installed).
    pub only_package: Option<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            update: false,
            dry_run: false,
            max_parallel: 4,
            limits: GraphLimits::default(),
            only_package: None,
        }
    }
}

/// Drives C4 + C5 into an on-disk `apm_modules/` tree.
pub struct Installer<'a> {
    source: &'a dyn PackageSource,
    project_root: PathBuf,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(source: &'a dyn PackageSource, project_root: &Path, options: InstallOptions) -> Self {
        Self {
            source,
            project_root: project_root.to_path_buf(),
            options,
        }
    }

    fn modules_root(&self) -> PathBuf {
        self.project_root.join(MODULES_DIR)
    }

    /// Resolve the graph and install every node, leaves first.
    pub async fn run(&self, manifest: &Manifest) -> Result<InstallReport, ApmError> {
        let graph = build_graph(self.source, manifest, self.options.limits).await?;

        let modules_root = self.modules_root();
        let lock_path = modules_root.join(LOCK_FILE);
        let previous_lock = LockFile::load(&lock_path)?;

        let mut report = InstallReport {
            warnings: graph.warnings.clone(),
            dry_run: self.options.dry_run,
            ..InstallReport::default()
        };

        let plan = self.plan(&graph, &previous_lock);
        report.entries = plan.iter().map(|(entry, _)| entry.clone()).collect();

        if self.options.dry_run {
            return Ok(report);
        }

        std::fs::create_dir_all(&modules_root).map_err(|e| ApmError::io(&modules_root, e))?;

        // Deepest level first; within a level, fetches run concurrently.
        let max_level = plan.iter().map(|(_, n)| n.level).max().unwrap_or(0);
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        for level in (1..=max_level).rev() {
            let level_nodes: Vec<&DependencyNode> = plan
                .iter()
                .filter(|(entry, node)| {
                    node.level == level && entry.action != InstallAction::Skipped
                })
                .map(|(_, node)| *node)
                .collect();
            if level_nodes.is_empty() {
                continue;
            }
            let results = futures::future::join_all(level_nodes.iter().map(|node| {
                let semaphore = Arc::clone(&semaphore);
                let modules_root = modules_root.clone();
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| ApmError::Config("install pool closed".to_string()))?;
                    self.install_node(&modules_root, node).await
                }
            }))
            .await;
            for result in results {
                result?;
            }
        }

        let lock = self.build_lock(&plan, &previous_lock);
        lock.save(&lock_path)?;
        info!(
            installed = report.installed_count(),
            total = report.entries.len(),
            "install complete"
        );

        Ok(report)
    }

    /// Decide per-node action against the existing tree and lock state.
    fn plan<'g>(
        &self,
        graph: &'g DependencyGraph,
        lock: &LockFile,
    ) -> Vec<(InstallEntry, &'g DependencyNode)> {
        let modules_root = self.modules_root();
        graph
            .install_order
            .iter()
            .map(|key| {
                let node = &graph.nodes[key];
                let target = node.spec.install_path(&modules_root);
                let recorded = lock.resolved_sha(key);
                let filtered_out = self
                    .options
                    .only_package
                    .as_deref()
                    .is_some_and(|only| only != key);
                let action = if target.is_dir()
                    && (filtered_out
                        || (!self.options.update
                            && recorded == Some(node.resolved_sha.as_str())))
                {
                    InstallAction::Skipped
                } else if target.is_dir() {
                    InstallAction::Updated
                } else {
                    InstallAction::Installed
                };
                (
                    InstallEntry {
                        key: key.clone(),
                        ref_requested: node.spec.reference.clone(),
                        resolved_sha: node.resolved_sha.clone(),
                        action,
                    },
                    node,
                )
            })
            .collect()
    }

    /// Fetch one node into a private staging directory, validate it, and
    /// swap it into place.
    async fn install_node(
        &self,
        modules_root: &Path,
        node: &DependencyNode,
    ) -> Result<(), ApmError> {
        let target = node.spec.install_path(modules_root);
        debug!(package = %node.spec.key(), sha = %node.resolved_sha, "fetching");

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(modules_root)
            .map_err(|e| ApmError::io(modules_root, e))?;

        with_retries(&node.spec.key(), || {
            self.source
                .fetch_archive(&node.spec, &node.resolved_sha, staging.path())
        })
        .await?;
        validate_package(staging.path())?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApmError::io(parent, e))?;
        }

        if target.exists() {
            // Move the old tree aside first so the final rename is atomic;
            // the TempDir drop cleans it up.
            let graveyard = tempfile::Builder::new()
                .prefix(".old-")
                .tempdir_in(modules_root)
                .map_err(|e| ApmError::io(modules_root, e))?;
            std::fs::rename(&target, graveyard.path().join("prev"))
                .map_err(|e| ApmError::io(&target, e))?;
            std::fs::rename(staging.into_path(), &target).map_err(|e| ApmError::io(&target, e))?;
        } else {
            std::fs::rename(staging.into_path(), &target).map_err(|e| ApmError::io(&target, e))?;
        }

        info!(package = %node.spec.key(), sha = %node.resolved_sha, "installed");
        Ok(())
    }

    /// Lock records for every node in the graph; skipped nodes keep their
    /// previous timestamp.
    fn build_lock(
        &self,
        plan: &[(InstallEntry, &DependencyNode)],
        previous: &LockFile,
    ) -> LockFile {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut lock = LockFile::default();
        for (entry, _) in plan {
            // Skipped nodes keep their previous record verbatim.
            let record = match (entry.action, previous.packages.get(&entry.key)) {
                (InstallAction::Skipped, Some(existing)) => existing.clone(),
                _ => LockRecord {
                    ref_requested: entry.ref_requested.clone(),
                    resolved_sha: entry.resolved_sha.clone(),
                    installed_at: now.clone(),
                },
            };
            lock.packages.insert(entry.key.clone(), record);
        }
        lock
    }
}
