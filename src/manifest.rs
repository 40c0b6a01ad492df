//! Manifest (`apm.yml`) model and loader.
//!
//! The manifest is the single configuration surface for a package: identity,
//! scripts, dependencies, and compilation settings. Unknown top-level keys
//! are preserved in `extras` and ignored by the core.

use crate::error::ApmError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Manifest file name inside a package root.
pub const MANIFEST_FILE: &str = "apm.yml";

/// A parsed `apm.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Script name -> raw command string, executed by the host shell.
    pub scripts: BTreeMap<String, String>,
    pub dependencies: Dependencies,
    pub compilation: CompilationConfig,
    /// Unknown top-level keys, preserved but ignored.
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_yml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Dependencies {
    /// APM package references, `owner/repo[#ref]`.
    pub apm: Vec<String>,
    /// Opaque MCP registry identifiers; installation is delegated.
    pub mcp: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    /// Output file name for emitted context files.
    pub output: String,
    /// Chatmode name to prepend at root placements.
    pub chatmode: Option<String>,
    /// Rewrite relative Markdown links in emitted bodies.
    pub resolve_links: bool,
    /// Inject `memory/constitution.md` at the root output.
    pub constitution: bool,
    pub placement: PlacementConfig,
    pub optimization: OptimizationConfig,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            output: "AGENTS.md".to_string(),
            chatmode: None,
            resolve_links: true,
            constitution: true,
            placement: PlacementConfig::default(),
            optimization: OptimizationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlacementConfig {
    /// Extra directory names pruned from analysis and placement.
    pub ignore: Vec<String>,
    /// Delete previously emitted output files no longer placed.
    pub clean_orphaned: bool,
}

/// Objective weights for the placement optimizer. Coverage is a hard
/// constraint; the weights only rank coverage-complete candidate sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub coverage_weight: f64,
    pub pollution_weight: f64,
    pub locality_weight: f64,
    /// Per-level penalty, capped at depth 8.
    pub depth_penalty: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            coverage_weight: 1.0,
            pollution_weight: 0.8,
            locality_weight: 0.3,
            depth_penalty: 0.1,
        }
    }
}

impl Manifest {
    /// Load and validate the manifest at `dir/apm.yml`.
    pub fn load(dir: &Path) -> Result<Self, ApmError> {
        let path = dir.join(MANIFEST_FILE);
        Self::load_from_file(&path)
    }

    /// Load and validate a manifest from an explicit file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ApmError> {
        if !path.is_file() {
            return Err(ApmError::MissingManifest {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ApmError::io(path, e))?;
        Self::parse(&text, path)
    }

    /// Parse manifest text; `path` is used for error reporting only.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ApmError> {
        let manifest: Manifest =
            serde_yml::from_str(text).map_err(|e| ApmError::MalformedManifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), ApmError> {
        if self.name.trim().is_empty() {
            return Err(ApmError::MalformedManifest {
                path: path.to_path_buf(),
                reason: "field `name` is required and must be non-empty".to_string(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(ApmError::MalformedManifest {
                path: path.to_path_buf(),
                reason: "field `version` is required and must be non-empty".to_string(),
            });
        }
        for spec in &self.dependencies.apm {
            DependencySpec::parse(spec)?;
        }
        Ok(())
    }

    /// Parsed APM dependency specs in manifest order.
    pub fn apm_dependencies(&self) -> Result<Vec<DependencySpec>, ApmError> {
        self.dependencies.apm.iter().map(|s| DependencySpec::parse(s)).collect()
    }
}

/// One `owner/repo[#ref]` dependency reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub owner: String,
    pub repo: String,
    /// Branch, tag, or commit; None means the default branch.
    pub reference: Option<String>,
}

impl DependencySpec {
    pub fn parse(spec: &str) -> Result<Self, ApmError> {
        let (repo_part, reference) = match spec.split_once('#') {
            Some((r, rf)) if !rf.trim().is_empty() => (r, Some(rf.trim().to_string())),
            Some((r, _)) => (r, None),
            None => (spec, None),
        };
        let mut segments = repo_part.split('/');
        let (owner, repo) = match (segments.next(), segments.next(), segments.next()) {
            (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
                (owner.trim().to_string(), repo.trim().to_string())
            }
            _ => {
                return Err(ApmError::InvalidDependencySpec {
                    spec: spec.to_string(),
                })
            }
        };
        Ok(Self {
            owner,
            repo,
            reference,
        })
    }

    /// Canonical node key: `owner/repo`, ref excluded.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// On-disk location of this dependency under the modules root.
    pub fn install_path(&self, modules_root: &Path) -> PathBuf {
        modules_root.join(&self.owner).join(&self.repo)
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Some(r) => write!(f, "{}/{}#{}", self.owner, self.repo, r),
            None => write!(f, "{}/{}", self.owner, self.repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("apm.yml")
    }

    #[test]
    fn parses_full_manifest() {
        let text = r#"
name: my-project
version: 1.0.0
scripts:
  start: "codex hello-world.prompt.md"
dependencies:
  apm:
    - org/context-pack#v1.2.0
  mcp:
    - ghcr.io/example/server
compilation:
  output: AGENTS.md
  resolve_links: true
"#;
        let manifest = Manifest::parse(text, &path()).unwrap();
        assert_eq!(manifest.name, "my-project");
        assert_eq!(manifest.scripts["start"], "codex hello-world.prompt.md");
        let deps = manifest.apm_dependencies().unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].owner, "org");
        assert_eq!(deps[0].reference.as_deref(), Some("v1.2.0"));
        assert!(manifest.compilation.resolve_links);
        assert_eq!(manifest.compilation.output, "AGENTS.md");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let manifest = Manifest::parse("name: x\nversion: '0.1'\n", &path()).unwrap();
        assert!(manifest.scripts.is_empty());
        assert!(manifest.dependencies.apm.is_empty());
        assert_eq!(manifest.compilation.output, "AGENTS.md");
        assert!(manifest.compilation.chatmode.is_none());
        assert_eq!(manifest.compilation.optimization.pollution_weight, 0.8);
    }

    #[test]
    fn missing_name_is_malformed() {
        let err = Manifest::parse("version: '1.0'\n", &path()).unwrap_err();
        match err {
            ApmError::MalformedManifest { reason, .. } => assert!(reason.contains("`name`")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_version_is_malformed() {
        let err = Manifest::parse("name: x\n", &path()).unwrap_err();
        match err {
            ApmError::MalformedManifest { reason, .. } => assert!(reason.contains("`version`")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_top_level_keys_preserved() {
        let manifest =
            Manifest::parse("name: x\nversion: '1'\nfuture_thing: 7\n", &path()).unwrap();
        assert!(manifest.extras.contains_key("future_thing"));
    }

    #[test]
    fn dependency_spec_forms() {
        let with_ref = DependencySpec::parse("acme/ctx#v1").unwrap();
        assert_eq!(with_ref.key(), "acme/ctx");
        assert_eq!(with_ref.reference.as_deref(), Some("v1"));

        let bare = DependencySpec::parse("acme/ctx").unwrap();
        assert!(bare.reference.is_none());
        assert_eq!(bare.to_string(), "acme/ctx");

        assert!(DependencySpec::parse("just-a-name").is_err());
        assert!(DependencySpec::parse("a/b/c").is_err());
        assert!(DependencySpec::parse("/b").is_err());
    }

    #[test]
    fn install_path_nests_owner_repo() {
        let spec = DependencySpec::parse("acme/ctx").unwrap();
        assert_eq!(
            spec.install_path(Path::new("apm_modules")),
            PathBuf::from("apm_modules/acme/ctx")
        );
    }
}
