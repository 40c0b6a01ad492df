//! Output emission: render one context file per placed directory, write
//! atomically, and clean up orphaned files from earlier compiles.

use crate::compile::constitution;
use crate::compile::optimizer::PlacementOutcome;
use crate::error::ApmError;
use crate::markdown::rewrite_relative_links;
use crate::primitives::{Chatmode, Instruction};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Emission settings resolved from the manifest and CLI flags.
#[derive(Debug, Clone)]
pub struct EmitSettings {
    /// Output file name, e.g. `AGENTS.md`.
    pub output_name: String,
    pub resolve_links: bool,
    /// Inject the constitution block at the project root.
    pub constitution: bool,
    pub clean_orphaned: bool,
    pub dry_run: bool,
}

/// What one emission pass did.
#[derive(Debug, Default)]
pub struct EmitReport {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl EmitReport {
    pub fn planned(&self) -> usize {
        self.written.len() + self.unchanged.len()
    }
}

/// Render and write every placed file. Running twice on an unchanged
/// workspace is byte-idempotent.
pub fn emit(
    project_root: &Path,
    outcome: &PlacementOutcome,
    instructions: &[Instruction],
    chatmode: Option<&Chatmode>,
    settings: &EmitSettings,
) -> Result<EmitReport, ApmError> {
    let mut report = EmitReport::default();
    let mut emitted: BTreeSet<PathBuf> = BTreeSet::new();

    for (dir, indices) in &outcome.placements {
        let target = dir.join(&settings.output_name);
        let is_root = dir == project_root;
        let existing = std::fs::read_to_string(&target).ok();
        let contents = render_directory(
            project_root,
            dir,
            indices,
            instructions,
            if is_root { chatmode } else { None },
            settings,
            existing.as_deref(),
        );
        emitted.insert(target.clone());

        if existing.as_deref() == Some(contents.as_str()) {
            report.unchanged.push(target);
            continue;
        }
        if !settings.dry_run {
            write_atomic(&target, &contents)?;
            debug!(path = %target.display(), "wrote context file");
        }
        report.written.push(target);
    }

    if settings.clean_orphaned {
        for orphan in find_orphans(project_root, &settings.output_name, &emitted) {
            if !settings.dry_run {
                std::fs::remove_file(&orphan).map_err(|e| ApmError::io(&orphan, e))?;
            }
            report.deleted.push(orphan);
        }
    }

    info!(
        written = report.written.len(),
        unchanged = report.unchanged.len(),
        deleted = report.deleted.len(),
        "emission complete"
    );
    Ok(report)
}

/// Render the file for one directory: optional constitution block and
/// chatmode at the root, then instruction sections grouped by pattern.
pub fn render_directory(
    project_root: &Path,
    dir: &Path,
    indices: &[usize],
    instructions: &[Instruction],
    chatmode: Option<&Chatmode>,
    settings: &EmitSettings,
    existing: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if dir == project_root && settings.constitution {
        if let Some(block) = constitution::block_for_project(project_root, existing) {
            parts.push(block.trim_end().to_string());
        }
    }

    if let Some(chatmode) = chatmode {
        let body = if settings.resolve_links {
            rewrite_relative_links(
                &chatmode.body,
                chatmode.source_path.parent().unwrap_or(project_root),
                dir,
            )
        } else {
            chatmode.body.clone()
        };
        parts.push(body.trim_end().to_string());
    }

    // Group by pattern, preserving first appearance in discovery order.
    let mut groups: Vec<(&str, Vec<&Instruction>)> = Vec::new();
    for &idx in indices {
        let instruction = &instructions[idx];
        match groups.iter_mut().find(|(p, _)| *p == instruction.apply_to) {
            Some((_, members)) => members.push(instruction),
            None => groups.push((&instruction.apply_to, vec![instruction])),
        }
    }

    for (pattern, members) in groups {
        let bodies: Vec<String> = members
            .iter()
            .map(|instruction| {
                let body = if settings.resolve_links {
                    rewrite_relative_links(
                        &instruction.body,
                        instruction.source_path.parent().unwrap_or(project_root),
                        dir,
                    )
                } else {
                    instruction.body.clone()
                };
                body.trim_end().to_string()
            })
            .collect();
        parts.push(format!(
            "## Files matching `{}`\n\n{}",
            pattern,
            bodies.join("\n\n")
        ));
    }

    let mut contents = parts.join("\n\n");
    contents.push('\n');
    contents
}

/// Atomic write: sibling tempfile, fsync, rename into place.
fn write_atomic(target: &Path, contents: &str) -> Result<(), ApmError> {
    let dir = target.parent().ok_or_else(|| {
        ApmError::Config(format!("output path {} has no parent", target.display()))
    })?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ApmError::io(dir, e))?;
    temp.write_all(contents.as_bytes())
        .map_err(|e| ApmError::io(target, e))?;
    temp.as_file().sync_all().map_err(|e| ApmError::io(target, e))?;
    temp.persist(target)
        .map_err(|e| ApmError::io(target, e.error))?;
    Ok(())
}

/// Existing output files not in the current placement set.
fn find_orphans(
    project_root: &Path,
    output_name: &str,
    emitted: &BTreeSet<PathBuf>,
) -> Vec<PathBuf> {
    const PRUNED_DIRS: &[&str] = &[".git", "apm_modules", "node_modules"];
    let mut orphans = Vec::new();
    let walker = WalkBuilder::new(project_root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && (name.starts_with('.') && entry.depth() > 0
                || PRUNED_DIRS.iter().any(|p| *p == name))
            {
                return false;
            }
            true
        })
        .build();
    for entry in walker.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file
            && entry.file_name().to_string_lossy() == output_name
            && !emitted.contains(entry.path())
        {
            orphans.push(entry.into_path());
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::analysis::DirectoryIndex;
    use crate::compile::optimizer::optimize_placements;
    use crate::manifest::{OptimizationConfig, PlacementConfig};
    use crate::primitives::PrimitiveSource;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn instruction(name: &str, pattern: &str, body: &str) -> Instruction {
        Instruction {
            name: name.to_string(),
            description: format!("{name} rules"),
            apply_to: pattern.to_string(),
            author: None,
            version: None,
            body: body.to_string(),
            source_path: PathBuf::from(format!("{name}.instructions.md")),
            source: PrimitiveSource::Local,
        }
    }

    fn settings() -> EmitSettings {
        EmitSettings {
            output_name: "AGENTS.md".to_string(),
            resolve_links: false,
            constitution: true,
            clean_orphaned: false,
            dry_run: false,
        }
    }

    fn run_emit(
        root: &Path,
        instructions: &[Instruction],
        settings: &EmitSettings,
    ) -> EmitReport {
        let index = DirectoryIndex::build(root, &PlacementConfig::default(), "AGENTS.md");
        let outcome =
            optimize_placements(instructions, &index, &OptimizationConfig::default()).unwrap();
        emit(root, &outcome, instructions, None, settings).unwrap()
    }

    #[test]
    fn single_point_scenario_emits_one_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "docs/a.md", "a");
        touch(root, "docs/b.md", "b");
        touch(root, "src/main.py", "print()");

        let instructions = [instruction("docs", "docs/**/*.md", "Use present tense.\n")];
        let report = run_emit(root, &instructions, &settings());

        assert_eq!(report.written, vec![root.join("docs/AGENTS.md")]);
        let contents = fs::read_to_string(root.join("docs/AGENTS.md")).unwrap();
        assert_eq!(
            contents,
            "## Files matching `docs/**/*.md`\n\nUse present tense.\n"
        );
        assert!(!root.join("AGENTS.md").exists());
        assert!(!root.join("src/AGENTS.md").exists());
    }

    #[test]
    fn emission_is_byte_idempotent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "docs/a.md", "a");

        let instructions = [instruction("docs", "docs/**/*.md", "Body.\n")];
        let first = run_emit(root, &instructions, &settings());
        assert_eq!(first.written.len(), 1);
        let bytes_before = fs::read(root.join("docs/AGENTS.md")).unwrap();

        let second = run_emit(root, &instructions, &settings());
        assert!(second.written.is_empty());
        assert_eq!(second.unchanged.len(), 1);
        let bytes_after = fs::read(root.join("docs/AGENTS.md")).unwrap();
        assert_eq!(bytes_before, bytes_after);
    }

    #[test]
    fn groups_instructions_by_pattern() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "src/a.py", "x");

        let instructions = [
            instruction("style", "**/*.py", "Use snake_case.\n"),
            instruction("docs", "**/*.py", "Document public functions.\n"),
        ];
        run_emit(root, &instructions, &settings());

        let contents = fs::read_to_string(root.join("src/AGENTS.md")).unwrap();
        assert_eq!(
            contents,
            "## Files matching `**/*.py`\n\nUse snake_case.\n\nDocument public functions.\n"
        );
    }

    #[test]
    fn constitution_block_leads_root_output() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "memory/constitution.md", "Principles: first.\n");
        touch(root, "a/x.py", "x");
        touch(root, "b/y.py", "y");
        touch(root, "c/z.py", "z");

        let instructions = [instruction("py", "**/*.py", "Body.\n")];
        run_emit(root, &instructions, &settings());

        let contents = fs::read_to_string(root.join("AGENTS.md")).unwrap();
        assert!(contents.starts_with("<!-- SPEC-KIT CONSTITUTION: BEGIN -->\n"));
        let second_line = contents.lines().nth(1).unwrap();
        assert!(second_line.starts_with("hash: "));
        assert!(second_line.ends_with("path: memory/constitution.md"));
        assert!(contents.contains("Principles: first.\n"));

        // Second compile reproduces the same bytes.
        let before = fs::read(root.join("AGENTS.md")).unwrap();
        run_emit(root, &instructions, &settings());
        assert_eq!(before, fs::read(root.join("AGENTS.md")).unwrap());
    }

    #[test]
    fn orphaned_outputs_deleted_when_enabled() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "docs/a.md", "a");
        touch(root, "stale/AGENTS.md", "old output\n");

        let instructions = [instruction("docs", "docs/**/*.md", "Body.\n")];
        let mut emit_settings = settings();
        emit_settings.clean_orphaned = true;
        let report = run_emit(root, &instructions, &emit_settings);

        assert_eq!(report.deleted, vec![root.join("stale/AGENTS.md")]);
        assert!(!root.join("stale/AGENTS.md").exists());
        assert!(root.join("docs/AGENTS.md").exists());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "docs/a.md", "a");

        let instructions = [instruction("docs", "docs/**/*.md", "Body.\n")];
        let mut emit_settings = settings();
        emit_settings.dry_run = true;
        let report = run_emit(root, &instructions, &emit_settings);
        assert_eq!(report.written.len(), 1);
        assert!(!root.join("docs/AGENTS.md").exists());
    }

    #[test]
    fn link_resolution_rewrites_relative_links() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "docs/a.md", "a");

        let mut with_links = instruction(
            "docs",
            "docs/**/*.md",
            "See [guide](style/guide.md).\n",
        );
        with_links.source_path = root.join(".apm/instructions/docs.instructions.md");
        let mut emit_settings = settings();
        emit_settings.resolve_links = true;
        run_emit(root, std::slice::from_ref(&with_links), &emit_settings);

        let contents = fs::read_to_string(root.join("docs/AGENTS.md")).unwrap();
        assert!(
            contents.contains("(../.apm/instructions/style/guide.md)"),
            "links rewritten relative to the emitted file: {contents}"
        );
    }
}
