//! Text rendering for command output: headings, tables, summaries.

use crate::compile::CompileReport;
use crate::deps::installer::{InstallAction, InstallReport};
use crate::deps::lockfile::LockFile;
use crate::error::ValidationWarning;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::Path;

/// Format a section heading with bold/underline. Respects NO_COLOR and TTY.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

/// Human-readable install summary.
pub fn format_install_report_text(report: &InstallReport) -> String {
    let mut out = String::new();
    let heading = if report.dry_run {
        "Install Plan (dry run)"
    } else {
        "Install"
    };
    out.push_str(&format!("{}\n\n", format_section_heading(heading)));

    if report.entries.is_empty() {
        out.push_str("No APM dependencies declared.\n");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Package", "Ref", "Resolved", "Action"]);
        for entry in &report.entries {
            table.add_row(vec![
                entry.key.clone(),
                entry.ref_requested.clone().unwrap_or_else(|| "-".to_string()),
                short_sha(&entry.resolved_sha),
                entry.action.as_str().to_string(),
            ]);
        }
        out.push_str(&table.to_string());
        out.push('\n');
        let installed = report.installed_count();
        let skipped = report
            .entries
            .iter()
            .filter(|e| e.action == InstallAction::Skipped)
            .count();
        out.push_str(&format!(
            "{} package(s) {}, {} up to date\n",
            installed,
            if report.dry_run { "to install" } else { "installed" },
            skipped
        ));
    }

    for warning in &report.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

/// `deps list` table from the lock file and installed tree.
pub fn format_deps_list_text(lock: &LockFile, installed: &[(String, std::path::PathBuf)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Installed Packages")));
    if installed.is_empty() {
        out.push_str("No packages installed. Run `apm install` first.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Package", "Ref", "Resolved", "Installed At"]);
    for (key, _) in installed {
        let record = lock.packages.get(key);
        table.add_row(vec![
            key.clone(),
            record
                .and_then(|r| r.ref_requested.clone())
                .unwrap_or_else(|| "-".to_string()),
            record
                .map(|r| short_sha(&r.resolved_sha))
                .unwrap_or_else(|| "?".to_string()),
            record
                .map(|r| r.installed_at.clone())
                .unwrap_or_else(|| "?".to_string()),
        ]);
    }
    out.push_str(&table.to_string());
    out.push('\n');
    out
}

/// Compile summary: placements per strategy plus written files.
pub fn format_compile_report_text(report: &CompileReport, project_root: &Path) -> String {
    let mut out = String::new();
    let heading = if report.dry_run {
        "Compile Plan (dry run)"
    } else {
        "Compile"
    };
    out.push_str(&format!("{}\n\n", format_section_heading(heading)));
    out.push_str(&format!(
        "Primitives: {} ({} instruction(s))\n",
        report.primitives, report.instructions
    ));

    let mut by_strategy: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut total_pollution = 0usize;
    for metric in &report.metrics {
        if metric.matched_files > 0 {
            *by_strategy.entry(metric.strategy.as_str()).or_default() += 1;
            total_pollution += metric.pollution;
        }
    }
    if !by_strategy.is_empty() {
        let strategies: Vec<String> = by_strategy
            .iter()
            .map(|(name, count)| format!("{name}: {count}"))
            .collect();
        out.push_str(&format!("Strategies: {}\n", strategies.join(", ")));
        out.push_str(&format!("Pollution estimate: {total_pollution} file(s)\n"));
    }

    let describe = |paths: &[std::path::PathBuf], label: &str, out: &mut String| {
        for path in paths {
            let rel = path.strip_prefix(project_root).unwrap_or(path);
            out.push_str(&format!("  {label} {}\n", rel.display()));
        }
    };
    if report.emit.written.is_empty()
        && report.emit.unchanged.is_empty()
        && report.emit.deleted.is_empty()
    {
        out.push_str("Nothing to emit: no instruction matched any file.\n");
    } else {
        out.push('\n');
        describe(&report.emit.written, "wrote", &mut out);
        describe(&report.emit.unchanged, "unchanged", &mut out);
        describe(&report.emit.deleted, "deleted", &mut out);
    }

    for warning in &report.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

/// Validation summary for `compile --validate`.
pub fn format_validation_text(primitives: usize, warnings: &[ValidationWarning]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Validation")));
    out.push_str(&format!("{primitives} primitive(s) discovered\n"));
    if warnings.is_empty() {
        out.push_str("No validation warnings.\n");
    } else {
        for warning in warnings {
            out.push_str(&format!("warning: {warning}\n"));
        }
    }
    out
}

/// Script table for `list`.
pub fn format_scripts_text(scripts: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Scripts")));
    if scripts.is_empty() {
        out.push_str("No scripts defined in apm.yml.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Name", "Command"]);
    for (name, command) in scripts {
        table.add_row(vec![name.clone(), command.clone()]);
    }
    out.push_str(&table.to_string());
    out.push('\n');
    out
}

/// First 8 characters of a commit SHA for table display.
pub fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}
