//! Dependency resolution and installation.
//!
//! `fetcher` talks to the hosting provider, `graph` computes the transitive
//! dependency graph, `installer` orchestrates fetches into `apm_modules/`,
//! and `lockfile` records resolved SHAs.

pub mod fetcher;
pub mod graph;
pub mod installer;
pub mod lockfile;

pub use fetcher::{GitHubSource, PackageSource, ResolvedRef};
pub use graph::{DependencyGraph, DependencyNode, GraphLimits};
pub use installer::{InstallAction, InstallOptions, InstallReport, Installer};
pub use lockfile::{LockFile, LockRecord};

/// Directory under the project root that holds installed dependencies.
pub const MODULES_DIR: &str = "apm_modules";

/// Lock file name inside the modules directory.
pub const LOCK_FILE: &str = ".apm-lock";
