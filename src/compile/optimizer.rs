//! Instruction placement: decide which directories receive an output file
//! so that every matching file inherits its instructions through directory
//! ancestry while irrelevant inheritance stays minimal.
//!
//! A pure function from `(instructions, directory index, config)` to a
//! placement map; the caches are explicit inputs so repeated invocations
//! (watch mode) stay independent.

use crate::compile::analysis::{DirectoryIndex, ProjectFile};
use crate::error::ApmError;
use crate::manifest::OptimizationConfig;
use crate::markdown::PatternMatcher;
use crate::primitives::Instruction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which tier chose the placement set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlacementStrategy {
    /// All matches concentrated; one file at the lowest common ancestor.
    SinglePoint,
    /// Matches in a few subtrees; a minimal covering set of directories.
    SelectiveMulti,
    /// Matches spread project-wide; one file at the root.
    Distributed,
    /// Coverage escalation exhausted every ancestor; root placement.
    RootFallback,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePoint => "single-point",
            Self::SelectiveMulti => "selective-multi",
            Self::Distributed => "distributed",
            Self::RootFallback => "root-fallback",
        }
    }
}

/// Per-instruction placement diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementMetrics {
    pub instruction: String,
    pub pattern: String,
    pub strategy: PlacementStrategy,
    pub distribution_score: f64,
    /// Always 1.0 by construction; kept for the summary output.
    pub coverage: f64,
    /// Files inheriting the instruction that do not match its pattern.
    pub pollution: usize,
    pub matched_files: usize,
    pub placements: Vec<PathBuf>,
}

/// The optimizer's output: directory -> instruction indices (into the
/// input slice), plus per-instruction metrics.
#[derive(Debug, Default)]
pub struct PlacementOutcome {
    pub placements: BTreeMap<PathBuf, Vec<usize>>,
    pub metrics: Vec<PlacementMetrics>,
}

/// Distribution-score thresholds between the three tiers.
const SINGLE_POINT_MAX: f64 = 0.3;
const DISTRIBUTED_MIN: f64 = 0.7;

/// Depth beyond which the per-level penalty stops growing.
const DEPTH_PENALTY_CAP: usize = 8;

/// Compute placements for every instruction.
///
/// Instructions whose pattern matches zero files produce no placements.
/// An invalid pattern aborts the compile.
pub fn optimize_placements(
    instructions: &[Instruction],
    index: &DirectoryIndex,
    config: &OptimizationConfig,
) -> Result<PlacementOutcome, ApmError> {
    let mut outcome = PlacementOutcome::default();

    for (idx, instruction) in instructions.iter().enumerate() {
        let matcher = PatternMatcher::new(&instruction.apply_to)?;
        let matching_files = index.files_matching(&matcher);

        if matching_files.is_empty() {
            outcome.metrics.push(PlacementMetrics {
                instruction: instruction.name.clone(),
                pattern: instruction.apply_to.clone(),
                strategy: PlacementStrategy::SinglePoint,
                distribution_score: 0.0,
                coverage: 1.0,
                pollution: 0,
                matched_files: 0,
                placements: Vec::new(),
            });
            continue;
        }

        let matching_dirs: BTreeSet<PathBuf> =
            matching_files.iter().map(|f| f.dir.clone()).collect();
        let score = distribution_score(index, &matching_dirs);

        // A single matching directory is always a single point; the score
        // tiers only arbitrate genuinely spread-out matches.
        let (mut placements, mut strategy) = if matching_dirs.len() == 1 || score < SINGLE_POINT_MAX
        {
            (
                vec![lowest_common_ancestor(&index.root, &matching_dirs)],
                PlacementStrategy::SinglePoint,
            )
        } else if score > DISTRIBUTED_MIN {
            (vec![index.root.clone()], PlacementStrategy::Distributed)
        } else {
            (
                greedy_cover(index, &matcher, &matching_files, &matching_dirs, config),
                PlacementStrategy::SelectiveMulti,
            )
        };

        // Coverage is a hard constraint: every matching file must see a
        // placement on its ancestor chain. Escalate until it holds.
        loop {
            let uncovered = uncovered_files(&matching_files, &placements);
            if uncovered.is_empty() {
                break;
            }
            if placements.contains(&index.root) {
                // Root covers everything; reaching here is an internal error.
                return Err(ApmError::CoverageViolation {
                    pattern: instruction.apply_to.clone(),
                    uncovered: uncovered.len(),
                });
            }
            let uncovered_dirs: BTreeSet<PathBuf> =
                uncovered.iter().map(|f| f.dir.clone()).collect();
            let ancestor = lowest_common_ancestor(&index.root, &uncovered_dirs);
            if ancestor == index.root {
                placements = vec![index.root.clone()];
                strategy = PlacementStrategy::RootFallback;
            } else {
                placements.push(ancestor);
                placements.sort();
                placements.dedup();
            }
        }

        placements.sort();
        placements.dedup();

        let pollution = placement_pollution(index, &matcher, &placements);
        debug!(
            instruction = %instruction.name,
            pattern = %instruction.apply_to,
            strategy = strategy.as_str(),
            score,
            pollution,
            "placed instruction"
        );

        for dir in &placements {
            outcome.placements.entry(dir.clone()).or_default().push(idx);
        }
        outcome.metrics.push(PlacementMetrics {
            instruction: instruction.name.clone(),
            pattern: instruction.apply_to.clone(),
            strategy,
            distribution_score: score,
            coverage: 1.0,
            pollution,
            matched_files: matching_files.len(),
            placements,
        });
    }

    Ok(outcome)
}

/// How spread out a pattern's matches are: the share of populated
/// directories that contain a match, inflated by depth variance.
fn distribution_score(index: &DirectoryIndex, matching_dirs: &BTreeSet<PathBuf>) -> f64 {
    let total_dirs_with_files = index.dirs_with_files().max(1);
    let base_ratio = matching_dirs.len() as f64 / total_dirs_with_files as f64;

    let depths: Vec<f64> = matching_dirs
        .iter()
        .filter_map(|d| index.analysis(d))
        .map(|a| a.depth as f64)
        .collect();
    if depths.is_empty() {
        return base_ratio;
    }
    let mean_depth = depths.iter().sum::<f64>() / depths.len() as f64;
    let depth_variance =
        depths.iter().map(|d| (d - mean_depth).powi(2)).sum::<f64>() / depths.len() as f64;

    base_ratio * (1.0 + depth_variance * 0.5)
}

/// Lowest common ancestor of a directory set, clamped to the project root.
fn lowest_common_ancestor(root: &Path, dirs: &BTreeSet<PathBuf>) -> PathBuf {
    let mut iter = dirs.iter();
    let Some(first) = iter.next() else {
        return root.to_path_buf();
    };
    let mut common: Vec<_> = first.components().collect();
    for dir in iter {
        let components: Vec<_> = dir.components().collect();
        let shared = common
            .iter()
            .zip(components.iter())
            .take_while(|(a, b)| a == b)
            .count();
        common.truncate(shared);
    }
    let ancestor: PathBuf = common.iter().collect();
    if ancestor.starts_with(root) {
        ancestor
    } else {
        root.to_path_buf()
    }
}

/// Greedily pick a minimal set of matching directories covering all
/// matching files. Ties prefer lower pollution, then the depth-adjusted
/// locality score, then the lexicographically smaller path.
fn greedy_cover(
    index: &DirectoryIndex,
    matcher: &PatternMatcher,
    matching_files: &[&ProjectFile],
    matching_dirs: &BTreeSet<PathBuf>,
    config: &OptimizationConfig,
) -> Vec<PathBuf> {
    struct Candidate<'a> {
        gain: usize,
        pollution: usize,
        locality: f64,
        dir: &'a PathBuf,
    }

    let mut chosen: Vec<PathBuf> = Vec::new();
    let mut covered: BTreeSet<&str> = BTreeSet::new();

    while covered.len() < matching_files.len() {
        let mut best: Option<Candidate<'_>> = None;
        for candidate in matching_dirs {
            if chosen.contains(candidate) {
                continue;
            }
            let gain = matching_files
                .iter()
                .filter(|f| !covered.contains(f.rel.as_str()) && f.dir.starts_with(candidate))
                .count();
            if gain == 0 {
                continue;
            }
            let pollution = directory_pollution(index, matcher, candidate);
            let locality = locality_score(index, candidate, config);
            let replace = match &best {
                None => true,
                Some(current) => {
                    use std::cmp::Ordering;
                    match gain.cmp(&current.gain) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => match current.pollution.cmp(&pollution) {
                            Ordering::Greater => true,
                            Ordering::Less => false,
                            Ordering::Equal => match locality
                                .partial_cmp(&current.locality)
                                .unwrap_or(Ordering::Equal)
                            {
                                Ordering::Greater => true,
                                Ordering::Less => false,
                                Ordering::Equal => candidate < current.dir,
                            },
                        },
                    }
                }
            };
            if replace {
                best = Some(Candidate {
                    gain,
                    pollution,
                    locality,
                    dir: candidate,
                });
            }
        }

        let Some(winner) = best else {
            // No candidate advances coverage; the caller escalates.
            break;
        };
        for file in matching_files {
            if file.dir.starts_with(winner.dir) {
                covered.insert(file.rel.as_str());
            }
        }
        chosen.push(winner.dir.clone());
    }

    chosen.sort();
    chosen
}

/// Deeper placements sit closer to their matches; reward depth up to the
/// penalty cap.
fn locality_score(index: &DirectoryIndex, dir: &Path, config: &OptimizationConfig) -> f64 {
    let depth = index.analysis(dir).map(|a| a.depth).unwrap_or(0);
    let capped = depth.min(DEPTH_PENALTY_CAP);
    config.locality_weight * depth as f64 - config.depth_penalty * capped as f64
}

/// Files under `dir` that would inherit the instruction without matching.
fn directory_pollution(index: &DirectoryIndex, matcher: &PatternMatcher, dir: &Path) -> usize {
    let total = index.analysis(dir).map(|a| a.recursive_files).unwrap_or(0);
    total.saturating_sub(index.matching_under(matcher, dir))
}

fn placement_pollution(
    index: &DirectoryIndex,
    matcher: &PatternMatcher,
    placements: &[PathBuf],
) -> usize {
    placements
        .iter()
        .map(|p| directory_pollution(index, matcher, p))
        .sum()
}

fn uncovered_files<'a>(
    matching_files: &[&'a ProjectFile],
    placements: &[PathBuf],
) -> Vec<&'a ProjectFile> {
    matching_files
        .iter()
        .filter(|f| !placements.iter().any(|p| f.dir.starts_with(p)))
        .copied()
        .collect()
}
