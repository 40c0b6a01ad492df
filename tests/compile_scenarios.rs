//! End-to-end compile scenarios driven through the CLI context.

use apm::tooling::cli::{CliContext, Commands};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn compile_command() -> Commands {
    Commands::Compile {
        output: None,
        chatmode: None,
        dry_run: false,
        no_links: false,
        with_constitution: false,
        no_constitution: false,
        watch: false,
        validate: false,
        format: "text".to_string(),
    }
}

fn instruction(description: &str, apply_to: &str, body: &str) -> String {
    format!("---\ndescription: {description}\napplyTo: \"{apply_to}\"\n---\n{body}")
}

#[test]
fn single_point_scenario() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/docs.instructions.md",
        &instruction("Docs tense", "docs/**/*.md", "Use present tense.\n"),
    );
    write(root, "docs/a.md", "a");
    write(root, "docs/b.md", "b");
    write(root, "src/main.py", "print()");

    let cli = CliContext::new(root.to_path_buf());
    let result = cli.execute(&compile_command()).unwrap();
    assert_eq!(result.exit_code, 0);

    let contents = fs::read_to_string(root.join("docs/AGENTS.md")).unwrap();
    assert_eq!(
        contents,
        "## Files matching `docs/**/*.md`\n\nUse present tense.\n"
    );
    assert!(!root.join("AGENTS.md").exists());
    assert!(!root.join("src/AGENTS.md").exists());
}

#[test]
fn distributed_scenario_places_at_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/python.instructions.md",
        &instruction("Python rules", "**/*.py", "Follow PEP 8.\n"),
    );
    // Four of the five populated directories (root counts via apm.yml)
    // contain matches, putting the distribution score past the root tier.
    write(root, "src/main.py", "x");
    write(root, "src/a.py", "x");
    write(root, "lib/b.py", "x");
    write(root, "tools/c.py", "x");
    write(root, "scripts/d.py", "x");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    let contents = fs::read_to_string(root.join("AGENTS.md")).unwrap();
    assert!(contents.contains("## Files matching `**/*.py`"));
    assert!(contents.contains("Follow PEP 8."));
    for sub in ["src", "lib", "tools", "scripts"] {
        assert!(!root.join(sub).join("AGENTS.md").exists());
    }
}

#[test]
fn selective_multi_scenario_emits_two_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/tsx.instructions.md",
        &instruction("TSX rules", "**/*.tsx", "Use function components.\n"),
    );
    write(root, "frontend/components/x.tsx", "x");
    write(root, "src/components/y.tsx", "y");
    write(root, "src/utils/z.ts", "z");
    write(root, "docs/readme.md", "d");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    for placed in ["frontend/components/AGENTS.md", "src/components/AGENTS.md"] {
        let contents = fs::read_to_string(root.join(placed)).unwrap();
        assert!(contents.contains("Use function components."), "{placed}");
    }
    assert!(!root.join("AGENTS.md").exists());
}

#[test]
fn constitution_scenario_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(root, "memory/constitution.md", "Principles: stay small.\n");
    write(
        root,
        ".apm/instructions/everything.instructions.md",
        &instruction("Everything", "**/*.py", "Keep it simple.\n"),
    );
    // Matches in the root and three subdirectories: four of five populated
    // directories (memory/ is the fifth), so placement lands at the root
    // and the constitution block is injected.
    write(root, "main.py", "m");
    write(root, "a/x.py", "x");
    write(root, "b/y.py", "y");
    write(root, "c/z.py", "z");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    let contents = fs::read_to_string(root.join("AGENTS.md")).unwrap();
    assert!(contents.starts_with("<!-- SPEC-KIT CONSTITUTION: BEGIN -->\n"));
    let second_line = contents.lines().nth(1).unwrap();
    let hash = second_line
        .strip_prefix("hash: ")
        .and_then(|rest| rest.split_once(' '))
        .map(|(h, _)| h)
        .unwrap();
    assert_eq!(hash.len(), 12);
    assert!(second_line.ends_with("path: memory/constitution.md"));
    assert!(contents.contains("Principles: stay small.\n"));
    assert!(contents.contains("<!-- SPEC-KIT CONSTITUTION: END -->"));

    // Byte-identical on a second compile.
    let before = fs::read(root.join("AGENTS.md")).unwrap();
    cli.execute(&compile_command()).unwrap();
    assert_eq!(before, fs::read(root.join("AGENTS.md")).unwrap());
}

#[test]
fn compile_twice_is_byte_identical_everywhere() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/docs.instructions.md",
        &instruction("Docs", "docs/**/*.md", "Docs body.\n"),
    );
    write(
        root,
        ".apm/instructions/python.instructions.md",
        &instruction("Python", "**/*.py", "Python body.\n"),
    );
    write(root, "docs/a.md", "a");
    write(root, "src/one.py", "1");
    write(root, "lib/two.py", "2");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    let mut snapshots = Vec::new();
    for entry in walk_outputs(root) {
        snapshots.push((entry.clone(), fs::read(&entry).unwrap()));
    }
    assert!(!snapshots.is_empty());

    cli.execute(&compile_command()).unwrap();
    for (path, bytes) in snapshots {
        assert_eq!(bytes, fs::read(&path).unwrap(), "{}", path.display());
    }
}

#[test]
fn orphaned_outputs_removed_when_configured() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "apm.yml",
        "name: demo\nversion: '1.0'\ncompilation:\n  placement:\n    clean_orphaned: true\n",
    );
    write(
        root,
        ".apm/instructions/docs.instructions.md",
        &instruction("Docs", "docs/**/*.md", "Docs body.\n"),
    );
    write(root, "docs/a.md", "a");
    write(root, "stale/AGENTS.md", "left over from an earlier layout\n");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    assert!(root.join("docs/AGENTS.md").exists());
    assert!(!root.join("stale/AGENTS.md").exists());
}

#[test]
fn local_primitive_shadows_dependency() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/style.instructions.md",
        &instruction("Local style", "docs/**/*.md", "Local rules win.\n"),
    );
    write(
        root,
        "apm_modules/acme/ctx/apm.yml",
        "name: ctx\nversion: '1'\n",
    );
    write(
        root,
        "apm_modules/acme/ctx/.apm/instructions/style.instructions.md",
        &instruction("Dep style", "docs/**/*.md", "Dependency rules.\n"),
    );
    write(root, "docs/a.md", "a");

    let cli = CliContext::new(root.to_path_buf());
    cli.execute(&compile_command()).unwrap();

    let contents = fs::read_to_string(root.join("docs/AGENTS.md")).unwrap();
    assert!(contents.contains("Local rules win."));
    assert!(!contents.contains("Dependency rules."));
}

#[test]
fn zero_match_instruction_emits_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "apm.yml", "name: demo\nversion: '1.0'\n");
    write(
        root,
        ".apm/instructions/go.instructions.md",
        &instruction("Go rules", "**/*.go", "Gofmt everything.\n"),
    );
    write(root, "src/main.py", "x");

    let cli = CliContext::new(root.to_path_buf());
    let result = cli.execute(&compile_command()).unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(walk_outputs(root).is_empty());
}

/// All AGENTS.md files under `root`, skipping hidden and module trees.
fn walk_outputs(root: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if path.is_dir() {
                if !name.starts_with('.') && name != "apm_modules" {
                    stack.push(path);
                }
            } else if name == "AGENTS.md" {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
