//! Watch mode for `compile --watch`: debounced recompilation on
//! filesystem change.

use crate::compile::{compile_project, CompileOptions};
use crate::deps::MODULES_DIR;
use crate::error::ApmError;
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Debounce window between a change burst and the recompile.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Paths whose changes must not retrigger a compile (our own outputs and
/// state), to avoid a feedback loop.
fn is_self_inflicted(project_root: &Path, path: &Path, output_name: &str) -> bool {
    if path
        .file_name()
        .map(|n| n.to_string_lossy() == output_name)
        .unwrap_or(false)
    {
        return true;
    }
    path.strip_prefix(project_root)
        .map(|rel| rel.starts_with(MODULES_DIR) || rel.starts_with(".git"))
        .unwrap_or(false)
}

/// Compile once, then block watching the workspace and recompiling after
/// each debounced change burst. Runs until the process is interrupted.
pub fn watch_and_compile(project_root: &Path, options: &CompileOptions) -> Result<(), ApmError> {
    let output_name = options.output.clone().unwrap_or_else(|| {
        crate::manifest::Manifest::load(project_root)
            .map(|m| m.compilation.output)
            .unwrap_or_else(|_| "AGENTS.md".to_string())
    });

    let report = compile_project(project_root, options)?;
    info!(files = report.emit.planned(), "initial compile complete");

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .map_err(|e| ApmError::Config(format!("failed to create watcher: {e}")))?;
    watcher
        .watch(project_root, RecursiveMode::Recursive)
        .map_err(|e| ApmError::Config(format!("failed to watch workspace: {e}")))?;
    info!(workspace = %project_root.display(), "watching for changes");

    let mut pending: Vec<PathBuf> = Vec::new();
    let mut last_event = Instant::now();

    loop {
        let timeout = DEBOUNCE.saturating_sub(last_event.elapsed());
        match rx.recv_timeout(timeout.max(Duration::from_millis(10))) {
            Ok(Ok(event)) => {
                for path in event.paths {
                    if !is_self_inflicted(project_root, &path, &output_name) {
                        pending.push(path);
                    }
                }
                last_event = Instant::now();
            }
            Ok(Err(e)) => warn!("watch error: {e}"),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !pending.is_empty() && last_event.elapsed() >= DEBOUNCE {
                    debug!(changes = pending.len(), "recompiling after change burst");
                    pending.clear();
                    match compile_project(project_root, options) {
                        Ok(report) => info!(
                            written = report.emit.written.len(),
                            "recompile complete"
                        ),
                        Err(e) => warn!("recompile failed: {e}"),
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("watcher channel disconnected");
                break;
            }
        }
    }

    Ok(())
}
