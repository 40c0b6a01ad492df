//! Transitive dependency graph: BFS with cycle detection and bounded size.

use crate::deps::fetcher::{with_retries, PackageSource};
use crate::error::ApmError;
use crate::manifest::{DependencySpec, Manifest};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Bounds on graph traversal.
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes: 256,
        }
    }
}

/// One resolved dependency.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// The winning spec for this key (first-encountered ref).
    pub spec: DependencySpec,
    pub resolved_sha: String,
    pub manifest: Manifest,
    /// Child node keys in manifest order.
    pub children: Vec<String>,
    /// BFS depth; direct dependencies are level 1.
    pub level: usize,
}

/// The resolved graph, guaranteed acyclic and within limits.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    pub nodes: BTreeMap<String, DependencyNode>,
    /// Leaves-first topological order, stable by first-seen position.
    pub install_order: Vec<String>,
    /// Non-fatal findings, e.g. version overrides.
    pub warnings: Vec<String>,
}

impl DependencyGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Build the graph by BFS over `dependencies.apm` lists, resolving each
/// ref and reading each dependency's manifest through `source`.
pub async fn build_graph(
    source: &dyn PackageSource,
    root: &Manifest,
    limits: GraphLimits,
) -> Result<DependencyGraph, ApmError> {
    let mut graph = DependencyGraph::default();
    let mut first_seen: Vec<String> = Vec::new();

    // (spec, depth, keys on the path from the root to this spec's parent)
    let mut queue: VecDeque<(DependencySpec, usize, Vec<String>)> = VecDeque::new();
    for spec in root.apm_dependencies()? {
        queue.push_back((spec, 1, Vec::new()));
    }

    while let Some((spec, depth, ancestors)) = queue.pop_front() {
        let key = spec.key();

        // A back edge to an ancestor on the current path is a cycle.
        if let Some(pos) = ancestors.iter().position(|a| *a == key) {
            let mut cycle: Vec<String> = ancestors[pos..].to_vec();
            cycle.push(key);
            return Err(ApmError::CircularDependency { cycle });
        }

        if let Some(existing) = graph.nodes.get(&key) {
            if existing.spec.reference != spec.reference {
                graph.warnings.push(format!(
                    "version override for {}: requested `{}`, keeping first-seen `{}`",
                    key,
                    spec.reference.as_deref().unwrap_or("<default>"),
                    existing.spec.reference.as_deref().unwrap_or("<default>"),
                ));
            }
            continue;
        }

        if depth > limits.max_depth || graph.nodes.len() >= limits.max_nodes {
            return Err(ApmError::DependencyExplosion {
                max_depth: limits.max_depth,
                max_nodes: limits.max_nodes,
            });
        }

        let resolved = with_retries(&key, || source.resolve_ref(&spec)).await?;
        let manifest =
            with_retries(&key, || source.fetch_manifest(&spec, &resolved.sha)).await?;
        debug!(package = %key, sha = %resolved.sha, level = depth, "resolved dependency");

        let children_specs = manifest.apm_dependencies()?;
        let children: Vec<String> = children_specs.iter().map(|c| c.key()).collect();

        let mut child_ancestors = ancestors.clone();
        child_ancestors.push(key.clone());
        for child in children_specs {
            queue.push_back((child, depth + 1, child_ancestors.clone()));
        }

        first_seen.push(key.clone());
        graph.nodes.insert(
            key,
            DependencyNode {
                spec,
                resolved_sha: resolved.sha,
                manifest,
                children,
                level: depth,
            },
        );
    }

    graph.install_order = topological_leaves_first(&graph.nodes, &first_seen);
    Ok(graph)
}

/// Leaves-first order: a node is emitted once all of its children are,
/// scanning in first-seen order for stability.
fn topological_leaves_first(
    nodes: &BTreeMap<String, DependencyNode>,
    first_seen: &[String],
) -> Vec<String> {
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let before = order.len();
        for key in first_seen {
            if order.contains(key) {
                continue;
            }
            let node = &nodes[key];
            let ready = node
                .children
                .iter()
                .all(|c| !nodes.contains_key(c) || order.contains(c));
            if ready {
                order.push(key.clone());
            }
        }
        // The graph is acyclic by construction, so progress is guaranteed.
        debug_assert!(order.len() > before, "no progress in topological sort");
        if order.len() == before {
            break;
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::fetcher::ResolvedRef;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;

    /// In-memory source: key -> (sha, manifest text).
    struct MapSource {
        packages: HashMap<String, (String, String)>,
    }

    impl MapSource {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            let packages = entries
                .iter()
                .map(|(key, sha, manifest)| {
                    (key.to_string(), (sha.to_string(), manifest.to_string()))
                })
                .collect();
            Self { packages }
        }
    }

    #[async_trait]
    impl PackageSource for MapSource {
        async fn resolve_ref(&self, spec: &DependencySpec) -> Result<ResolvedRef, ApmError> {
            let (sha, _) = self.packages.get(&spec.key()).ok_or_else(|| {
                ApmError::RefNotFound {
                    owner: spec.owner.clone(),
                    repo: spec.repo.clone(),
                    reference: spec.reference.clone().unwrap_or_else(|| "HEAD".to_string()),
                }
            })?;
            Ok(ResolvedRef { sha: sha.clone() })
        }

        async fn fetch_manifest(
            &self,
            spec: &DependencySpec,
            _sha: &str,
        ) -> Result<Manifest, ApmError> {
            let (_, manifest) = self.packages.get(&spec.key()).unwrap();
            Manifest::parse(manifest, Path::new("apm.yml"))
        }

        async fn fetch_archive(
            &self,
            _spec: &DependencySpec,
            _sha: &str,
            _dest: &Path,
        ) -> Result<(), ApmError> {
            Ok(())
        }
    }

    fn root_with_deps(deps: &[&str]) -> Manifest {
        let mut text = String::from("name: root\nversion: '1'\ndependencies:\n  apm:\n");
        for dep in deps {
            text.push_str(&format!("    - {dep}\n"));
        }
        Manifest::parse(&text, Path::new("apm.yml")).unwrap()
    }

    fn leaf(name: &str) -> String {
        format!("name: {name}\nversion: '1'\n")
    }

    fn with_deps(name: &str, deps: &[&str]) -> String {
        let mut text = format!("name: {name}\nversion: '1'\ndependencies:\n  apm:\n");
        for dep in deps {
            text.push_str(&format!("    - {dep}\n"));
        }
        text
    }

    #[tokio::test]
    async fn builds_transitive_graph_leaves_first() {
        let source = MapSource::new(&[
            ("a/top", "s1", &with_deps("top", &["b/mid"])),
            ("b/mid", "s2", &with_deps("mid", &["c/leaf"])),
            ("c/leaf", "s3", &leaf("leaf")),
        ]);
        let root = root_with_deps(&["a/top"]);
        let graph = build_graph(&source, &root, GraphLimits::default())
            .await
            .unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.install_order, vec!["c/leaf", "b/mid", "a/top"]);
        assert_eq!(graph.nodes["a/top"].level, 1);
        assert_eq!(graph.nodes["c/leaf"].level, 3);
    }

    #[tokio::test]
    async fn detects_cycle_with_full_path() {
        let source = MapSource::new(&[
            ("a/x", "s1", &with_deps("x", &["b/y"])),
            ("b/y", "s2", &with_deps("y", &["a/x"])),
        ]);
        let root = root_with_deps(&["a/x"]);
        let err = build_graph(&source, &root, GraphLimits::default())
            .await
            .unwrap_err();
        match err {
            ApmError::CircularDependency { cycle } => {
                assert_eq!(cycle, vec!["a/x", "b/y", "a/x"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_ref_wins_with_warning() {
        let source = MapSource::new(&[
            ("a/one", "s1", &with_deps("one", &["c/shared#v2"])),
            ("b/two", "s2", &with_deps("two", &["c/shared#v3"])),
            ("c/shared", "s3", &leaf("shared")),
        ]);
        let root = root_with_deps(&["a/one", "b/two"]);
        let graph = build_graph(&source, &root, GraphLimits::default())
            .await
            .unwrap();
        assert_eq!(
            graph.nodes["c/shared"].spec.reference.as_deref(),
            Some("v2")
        );
        assert_eq!(graph.warnings.len(), 1);
        assert!(graph.warnings[0].contains("version override"));
    }

    #[tokio::test]
    async fn diamond_is_not_a_cycle() {
        let source = MapSource::new(&[
            ("a/one", "s1", &with_deps("one", &["c/shared"])),
            ("b/two", "s2", &with_deps("two", &["c/shared"])),
            ("c/shared", "s3", &leaf("shared")),
        ]);
        let root = root_with_deps(&["a/one", "b/two"]);
        let graph = build_graph(&source, &root, GraphLimits::default())
            .await
            .unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert!(graph.warnings.is_empty());
    }

    #[tokio::test]
    async fn depth_limit_enforced() {
        let source = MapSource::new(&[
            ("a/d1", "s", &with_deps("d1", &["a/d2"])),
            ("a/d2", "s", &with_deps("d2", &["a/d3"])),
            ("a/d3", "s", &leaf("d3")),
        ]);
        let root = root_with_deps(&["a/d1"]);
        let limits = GraphLimits {
            max_depth: 2,
            max_nodes: 256,
        };
        let err = build_graph(&source, &root, limits).await.unwrap_err();
        assert!(matches!(err, ApmError::DependencyExplosion { .. }));
    }

    #[tokio::test]
    async fn empty_dependency_list_is_empty_graph() {
        let source = MapSource::new(&[]);
        let root = Manifest::parse("name: r\nversion: '1'\n", Path::new("apm.yml")).unwrap();
        let graph = build_graph(&source, &root, GraphLimits::default())
            .await
            .unwrap();
        assert!(graph.is_empty());
        assert!(graph.install_order.is_empty());
    }
}
