//! Error taxonomy for APM operations.
//!
//! Errors are returned as values through `Result`; validation problems are
//! collected as [`ValidationWarning`]s and only become fatal in strict mode.

use std::path::PathBuf;
use thiserror::Error;

/// All failure kinds the core can surface.
#[derive(Debug, Error)]
pub enum ApmError {
    #[error("malformed manifest at {}: {reason}", path.display())]
    MalformedManifest { path: PathBuf, reason: String },

    #[error("no apm.yml manifest found at {}", path.display())]
    MissingManifest { path: PathBuf },

    #[error("{} is not an APM package: {reason}", path.display())]
    NotAnApmPackage { path: PathBuf, reason: String },

    #[error("package at {} declares no primitives or workflows", path.display())]
    EmptyPackage { path: PathBuf },

    #[error("malformed frontmatter in {}: {reason}", path.display())]
    MalformedFrontmatter { path: PathBuf, reason: String },

    #[error("invalid glob pattern `{pattern}`: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("network error talking to {context}: {reason}")]
    Network { context: String, reason: String },

    #[error("authentication required for {owner}/{repo}: set APM_PAT or GITHUB_TOKEN to access private dependencies")]
    AuthRequired { owner: String, repo: String },

    #[error("ref `{reference}` not found in {owner}/{repo}")]
    RefNotFound {
        owner: String,
        repo: String,
        reference: String,
    },

    #[error("archive for {owner}/{repo} is corrupt: {reason}")]
    ArchiveCorrupt {
        owner: String,
        repo: String,
        reason: String,
    },

    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("dependency graph exceeds limits (max depth {max_depth}, max nodes {max_nodes})")]
    DependencyExplosion { max_depth: usize, max_nodes: usize },

    #[error("invalid dependency reference `{spec}`: expected owner/repo[#ref]")]
    InvalidDependencySpec { spec: String },

    #[error("coverage violation for pattern `{pattern}`: {uncovered} file(s) have no ancestor placement")]
    CoverageViolation { pattern: String, uncovered: usize },

    #[error("missing parameter `{name}` for script `{script}`: pass --param {name}=<value>")]
    MissingParameter { script: String, name: String },

    #[error("unknown script `{name}`: not present in apm.yml scripts")]
    UnknownScript { name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApmError {
    /// Wrap an I/O error with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this failure: 2 for network/auth during
    /// install, 1 for everything else user-visible.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Network { .. }
            | Self::AuthRequired { .. }
            | Self::RefNotFound { .. }
            | Self::ArchiveCorrupt { .. } => 2,
            _ => 1,
        }
    }
}

/// Non-fatal finding collected during discovery or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// File the warning concerns.
    pub path: PathBuf,
    /// Human-readable reason the primitive was skipped or flagged.
    pub reason: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}
