//! Directory analysis: one walk over the project producing per-directory
//! file counts used by the placement optimizer. Built once per compile and
//! cached by absolute path.

use crate::manifest::PlacementConfig;
use crate::markdown::PatternMatcher;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory names always pruned from analysis and placement.
const PRUNED_DIRS: &[&str] = &[".git", "apm_modules", "node_modules"];

/// Default maximum directory depth analyzed.
pub const DEFAULT_MAX_DEPTH: usize = 12;

/// Summary of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryAnalysis {
    pub path: PathBuf,
    /// Path segments from the project root; root is 0.
    pub depth: usize,
    /// Non-hidden regular files directly in this directory.
    pub immediate_files: usize,
    /// `immediate_files` summed over this directory and all descendants.
    pub recursive_files: usize,
    /// Child directories, sorted.
    pub children: Vec<PathBuf>,
}

/// A candidate instruction target.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    /// Forward-slash path relative to the project root.
    pub rel: String,
    /// Absolute directory containing the file.
    pub dir: PathBuf,
}

/// The per-compile directory cache plus the project file list.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    pub root: PathBuf,
    dirs: BTreeMap<PathBuf, DirectoryAnalysis>,
    files: Vec<ProjectFile>,
}

impl DirectoryIndex {
    /// Walk the project once and build the index.
    ///
    /// Hidden entries never count as instruction targets; `.git`,
    /// `apm_modules`, `node_modules`, and configured ignores are pruned.
    /// Files named `output_name` are this tool's own outputs and are
    /// excluded so a compile never changes the next compile's inputs.
    pub fn build(root: &Path, placement: &PlacementConfig, output_name: &str) -> Self {
        Self::build_with_depth(root, placement, output_name, DEFAULT_MAX_DEPTH)
    }

    pub fn build_with_depth(
        root: &Path,
        placement: &PlacementConfig,
        output_name: &str,
        max_depth: usize,
    ) -> Self {
        let ignored: Vec<String> = placement.ignore.clone();
        let mut dirs: BTreeMap<PathBuf, DirectoryAnalysis> = BTreeMap::new();
        let mut files: Vec<ProjectFile> = Vec::new();

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .max_depth(Some(max_depth))
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('.') && entry.depth() > 0 {
                    return false;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir && (PRUNED_DIRS.iter().any(|p| *p == name) || ignored.iter().any(|p| *p == name)) {
                    return false;
                }
                true
            })
            .build();

        for entry in walker.flatten() {
            let depth = entry.depth();
            let path = entry.path().to_path_buf();
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                dirs.insert(
                    path.clone(),
                    DirectoryAnalysis {
                        path,
                        depth,
                        immediate_files: 0,
                        recursive_files: 0,
                        children: Vec::new(),
                    },
                );
            } else if file_type.is_file() {
                if entry.file_name().to_string_lossy() == output_name {
                    continue;
                }
                let dir = path.parent().unwrap_or(root).to_path_buf();
                if let Some(analysis) = dirs.get_mut(&dir) {
                    analysis.immediate_files += 1;
                }
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                files.push(ProjectFile { rel, dir });
            }
        }

        // Children lists, then recursive counts bottom-up (deepest paths
        // sort last in the BTreeMap, so iterate in reverse).
        let dir_paths: Vec<PathBuf> = dirs.keys().cloned().collect();
        for path in &dir_paths {
            if let Some(parent) = path.parent().map(Path::to_path_buf) {
                if path != root && dirs.contains_key(&parent) {
                    if let Some(parent_analysis) = dirs.get_mut(&parent) {
                        parent_analysis.children.push(path.clone());
                    }
                }
            }
        }
        for path in dir_paths.iter().rev() {
            let child_total: usize = dirs[path]
                .children
                .iter()
                .map(|c| dirs[c].recursive_files)
                .sum();
            let analysis = dirs.get_mut(path).unwrap();
            analysis.recursive_files = analysis.immediate_files + child_total;
        }

        files.sort_by(|a, b| a.rel.cmp(&b.rel));

        Self {
            root: root.to_path_buf(),
            dirs,
            files,
        }
    }

    pub fn analysis(&self, dir: &Path) -> Option<&DirectoryAnalysis> {
        self.dirs.get(dir)
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryAnalysis> {
        self.dirs.values()
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    /// Count of directories with at least one immediate file.
    pub fn dirs_with_files(&self) -> usize {
        self.dirs.values().filter(|d| d.immediate_files > 0).count()
    }

    /// Files whose root-relative path matches `matcher`, in sorted order.
    pub fn files_matching<'a>(&'a self, matcher: &PatternMatcher) -> Vec<&'a ProjectFile> {
        self.files
            .iter()
            .filter(|f| matcher.matches_str(&f.rel))
            .collect()
    }

    /// Matching files at or below `dir`.
    pub fn matching_under(&self, matcher: &PatternMatcher, dir: &Path) -> usize {
        self.files
            .iter()
            .filter(|f| f.dir.starts_with(dir) && matcher.matches_str(&f.rel))
            .count()
    }
}
