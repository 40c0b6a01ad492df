//! CLI dispatcher: maps subcommands to core operations.
//!
//! The binary parses [`Cli`], builds a [`CliContext`] for the workspace,
//! and executes the command; every command returns its user-facing output
//! as a string plus an exit code.

use crate::compile::{compile_project, installed_packages, validate_project, CompileOptions};
use crate::deps::installer::{InstallOptions, Installer};
use crate::deps::lockfile::LockFile;
use crate::deps::{GitHubSource, LOCK_FILE, MODULES_DIR};
use crate::error::ApmError;
use crate::manifest::{DependencySpec, Manifest, MANIFEST_FILE};
use crate::package::validate_package;
use crate::primitives::PrimitiveSource;
use crate::tooling::format::{
    format_compile_report_text, format_deps_list_text, format_install_report_text,
    format_scripts_text, format_section_heading, format_validation_text, short_sha,
};
use crate::workflow;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// APM CLI - Agent Package Manager
#[derive(Parser)]
#[command(name = "apm")]
#[command(version, propagate_version = true)]
#[command(about = "Install AI context packages and compile AGENTS.md files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DependencyFilter {
    Apm,
    Mcp,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter manifest and sample workflow
    Init {
        /// Project name (defaults to the workspace directory name)
        name: Option<String>,
        /// Overwrite an existing manifest
        #[arg(long)]
        force: bool,
        /// Never prompt; refuse instead of asking
        #[arg(long)]
        yes: bool,
    },
    /// Resolve and install APM dependencies into apm_modules/
    Install {
        /// Restrict to one dependency type
        #[arg(long, value_enum)]
        only: Option<DependencyFilter>,
        /// Re-fetch packages even when the recorded SHA matches
        #[arg(long)]
        update: bool,
        /// Print the resolved plan without fetching
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect and maintain installed dependencies
    Deps {
        #[command(subcommand)]
        command: DepsCommands,
    },
    /// Compile primitives into context files
    Compile {
        /// Output file name (default from apm.yml, AGENTS.md)
        #[arg(long)]
        output: Option<String>,
        /// Chatmode to prepend at the project root
        #[arg(long)]
        chatmode: Option<String>,
        /// Print the placement plan without writing
        #[arg(long)]
        dry_run: bool,
        /// Emit bodies verbatim without rewriting relative links
        #[arg(long)]
        no_links: bool,
        /// Force constitution injection on
        #[arg(long, conflicts_with = "no_constitution")]
        with_constitution: bool,
        /// Force constitution injection off
        #[arg(long)]
        no_constitution: bool,
        /// Recompile on filesystem changes
        #[arg(long)]
        watch: bool,
        /// Validate primitives and exit nonzero on warnings
        #[arg(long)]
        validate: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run a manifest script with parameter substitution
    Run {
        /// Script name from apm.yml
        script: String,
        /// Parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Show a script's substituted prompt without executing
    Preview {
        /// Script name from apm.yml
        script: String,
        /// Parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// List manifest scripts
    List,
}

#[derive(Subcommand)]
pub enum DepsCommands {
    /// List installed packages
    List,
    /// Render the dependency tree
    Tree,
    /// Show one installed package
    Info {
        /// Package key (owner/repo) or repo name
        name: String,
    },
    /// Remove apm_modules/ wholesale
    Clean,
    /// Re-install at the newest resolved SHAs
    Update {
        /// Restrict to one package
        name: Option<String>,
    },
}

/// Output plus process exit code for one executed command.
#[derive(Debug)]
pub struct CommandResult {
    pub output: String,
    pub exit_code: i32,
}

impl From<String> for CommandResult {
    fn from(output: String) -> Self {
        Self {
            output,
            exit_code: 0,
        }
    }
}

/// CLI context carrying workspace state.
pub struct CliContext {
    workspace_root: PathBuf,
}

impl CliContext {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }

    fn manifest(&self) -> Result<Manifest, ApmError> {
        Manifest::load(&self.workspace_root)
    }

    fn modules_root(&self) -> PathBuf {
        self.workspace_root.join(MODULES_DIR)
    }

    /// Execute a CLI command.
    pub fn execute(&self, command: &Commands) -> Result<CommandResult, ApmError> {
        match command {
            Commands::Init { name, force, yes } => {
                self.handle_init(name.as_deref(), *force, *yes)
            }
            Commands::Install {
                only,
                update,
                dry_run,
            } => self.handle_install(*only, *update, *dry_run, None),
            Commands::Deps { command } => self.handle_deps(command),
            Commands::Compile {
                output,
                chatmode,
                dry_run,
                no_links,
                with_constitution,
                no_constitution,
                watch,
                validate,
                format,
            } => {
                let options = CompileOptions {
                    output: output.clone(),
                    chatmode: chatmode.clone(),
                    dry_run: *dry_run,
                    no_links: *no_links,
                    constitution: if *with_constitution {
                        Some(true)
                    } else if *no_constitution {
                        Some(false)
                    } else {
                        None
                    },
                };
                self.handle_compile(&options, *watch, *validate, format)
            }
            Commands::Run { script, params } => self.handle_run(script, params),
            Commands::Preview { script, params } => self.handle_preview(script, params),
            Commands::List => {
                let manifest = self.manifest()?;
                Ok(format_scripts_text(&manifest.scripts).into())
            }
        }
    }

    /// Write the starter manifest, sample workflow, and sample instruction.
    fn handle_init(
        &self,
        name: Option<&str>,
        force: bool,
        yes: bool,
    ) -> Result<CommandResult, ApmError> {
        let manifest_path = self.workspace_root.join(MANIFEST_FILE);
        if manifest_path.exists() && !force {
            if yes {
                return Err(ApmError::Config(format!(
                    "{} already exists; pass --force to overwrite",
                    manifest_path.display()
                )));
            }
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!("{} already exists. Overwrite?", MANIFEST_FILE))
                .default(false)
                .interact()
                .map_err(|e| ApmError::Config(format!("failed to read confirmation: {e}")))?;
            if !confirmed {
                return Err(ApmError::Config(format!(
                    "{} already exists; init refused",
                    manifest_path.display()
                )));
            }
        }

        let project_name = name
            .map(str::to_string)
            .or_else(|| {
                self.workspace_root
                    .canonicalize()
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            })
            .unwrap_or_else(|| "my-project".to_string());

        std::fs::create_dir_all(&self.workspace_root)
            .map_err(|e| ApmError::io(&self.workspace_root, e))?;
        let manifest = format!(
            "name: {project_name}\n\
             version: 0.1.0\n\
             description: AI-native workspace\n\
             scripts:\n\
             \x20 start: \"codex hello-world.prompt.md\"\n\
             dependencies:\n\
             \x20 apm: []\n\
             \x20 mcp: []\n\
             compilation:\n\
             \x20 output: AGENTS.md\n\
             \x20 resolve_links: true\n"
        );
        std::fs::write(&manifest_path, manifest).map_err(|e| ApmError::io(&manifest_path, e))?;

        let workflow_path = self.workspace_root.join("hello-world.prompt.md");
        std::fs::write(
            &workflow_path,
            "---\n\
             description: Greet someone by name\n\
             input: [name]\n\
             ---\n\
             Say hello to ${input:name} and summarize this repository.\n",
        )
        .map_err(|e| ApmError::io(&workflow_path, e))?;

        let instructions_dir = self.workspace_root.join(".apm/instructions");
        std::fs::create_dir_all(&instructions_dir)
            .map_err(|e| ApmError::io(&instructions_dir, e))?;
        let instruction_path = instructions_dir.join("general.instructions.md");
        std::fs::write(
            &instruction_path,
            "---\n\
             description: General project conventions\n\
             applyTo: \"**/*.md\"\n\
             ---\n\
             Write documentation in the present tense.\n",
        )
        .map_err(|e| ApmError::io(&instruction_path, e))?;

        Ok(format!(
            "Initialized APM project `{project_name}`\n\
             \x20 wrote {MANIFEST_FILE}\n\
             \x20 wrote hello-world.prompt.md\n\
             \x20 wrote .apm/instructions/general.instructions.md\n\
             Next: `apm compile`, then `apm run start --param name=you`\n"
        )
        .into())
    }

    fn handle_install(
        &self,
        only: Option<DependencyFilter>,
        update: bool,
        dry_run: bool,
        only_package: Option<String>,
    ) -> Result<CommandResult, ApmError> {
        let manifest = self.manifest()?;

        if only == Some(DependencyFilter::Mcp) {
            return Ok(self.describe_mcp_dependencies(&manifest).into());
        }

        let source = github_source()?;
        let options = InstallOptions {
            update,
            dry_run,
            only_package,
            ..InstallOptions::default()
        };
        let installer = Installer::new(&source, &self.workspace_root, options);
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| ApmError::Config(format!("failed to start async runtime: {e}")))?;
        let report = runtime.block_on(installer.run(&manifest))?;
        Ok(format_install_report_text(&report).into())
    }

    /// MCP installation is delegated to the runtime installers; the core
    /// only reports what they would receive.
    fn describe_mcp_dependencies(&self, manifest: &Manifest) -> String {
        let mut servers: BTreeSet<String> = manifest.dependencies.mcp.iter().cloned().collect();
        let (collection, _) = validate_project(&self.workspace_root);
        servers.extend(collection.mcp_servers());

        let mut out = String::new();
        out.push_str(&format!("{}\n\n", format_section_heading("MCP Dependencies")));
        if servers.is_empty() {
            out.push_str("No MCP servers declared in apm.yml or workflow frontmatter.\n");
        } else {
            for server in &servers {
                out.push_str(&format!("  {server}\n"));
            }
            out.push_str("\nMCP installation is delegated to the configured runtime installers.\n");
        }
        out
    }

    fn handle_deps(&self, command: &DepsCommands) -> Result<CommandResult, ApmError> {
        match command {
            DepsCommands::List => {
                let lock = LockFile::load(&self.modules_root().join(LOCK_FILE))?;
                let installed = installed_packages(&self.modules_root());
                Ok(format_deps_list_text(&lock, &installed).into())
            }
            DepsCommands::Tree => Ok(self.render_deps_tree()?.into()),
            DepsCommands::Info { name } => Ok(self.render_deps_info(name)?.into()),
            DepsCommands::Clean => {
                let modules = self.modules_root();
                let count = installed_packages(&modules).len();
                if modules.exists() {
                    std::fs::remove_dir_all(&modules).map_err(|e| ApmError::io(&modules, e))?;
                }
                Ok(format!("Removed {MODULES_DIR}/ ({count} package(s))\n").into())
            }
            DepsCommands::Update { name } => {
                let only_package = match name {
                    Some(name) => Some(self.resolve_package_key(name)?),
                    None => None,
                };
                self.handle_install(None, true, false, only_package)
            }
        }
    }

    fn render_deps_tree(&self) -> Result<String, ApmError> {
        let manifest = self.manifest()?;
        let lock = LockFile::load(&self.modules_root().join(LOCK_FILE))?;

        let mut out = String::new();
        out.push_str(&format!("{}\n\n", format_section_heading("Dependency Tree")));
        out.push_str(&format!("{} {}\n", manifest.name, manifest.version));
        let specs = manifest.apm_dependencies()?;
        if specs.is_empty() {
            out.push_str("  (no APM dependencies)\n");
            return Ok(out);
        }
        let mut visited = BTreeSet::new();
        for spec in specs {
            self.render_tree_node(&spec, 1, &lock, &mut visited, &mut out)?;
        }
        Ok(out)
    }

    fn render_tree_node(
        &self,
        spec: &DependencySpec,
        depth: usize,
        lock: &LockFile,
        visited: &mut BTreeSet<String>,
        out: &mut String,
    ) -> Result<(), ApmError> {
        let key = spec.key();
        let indent = "  ".repeat(depth);
        let sha = lock
            .resolved_sha(&key)
            .map(short_sha)
            .unwrap_or_else(|| "not installed".to_string());
        out.push_str(&format!("{indent}- {spec} ({sha})\n"));

        if !visited.insert(key) {
            return Ok(());
        }
        let installed_path = spec.install_path(&self.modules_root());
        if let Ok(child_manifest) = Manifest::load(&installed_path) {
            for child in child_manifest.apm_dependencies()? {
                self.render_tree_node(&child, depth + 1, lock, visited, out)?;
            }
        }
        Ok(())
    }

    fn render_deps_info(&self, name: &str) -> Result<String, ApmError> {
        let key = self.resolve_package_key(name)?;
        let path = self.modules_root().join(&key);
        let package = validate_package(&path)?;
        let lock = LockFile::load(&self.modules_root().join(LOCK_FILE))?;
        let outcome = package.discover(PrimitiveSource::Dependency(key.clone()));
        let collection = outcome.collection;

        let mut out = String::new();
        out.push_str(&format!("{}\n\n", format_section_heading(&key)));
        out.push_str(&format!("Name:        {}\n", package.manifest.name));
        out.push_str(&format!("Version:     {}\n", package.manifest.version));
        if let Some(description) = &package.manifest.description {
            out.push_str(&format!("Description: {description}\n"));
        }
        if let Some(author) = &package.manifest.author {
            out.push_str(&format!("Author:      {author}\n"));
        }
        if let Some(record) = lock.packages.get(&key) {
            out.push_str(&format!(
                "Resolved:    {} (ref {})\n",
                short_sha(&record.resolved_sha),
                record.ref_requested.as_deref().unwrap_or("default branch")
            ));
            out.push_str(&format!("Installed:   {}\n", record.installed_at));
        }
        out.push_str(&format!(
            "Primitives:  {} chatmode(s), {} instruction(s), {} context(s), {} workflow(s)\n",
            collection.chatmodes.len(),
            collection.instructions.len(),
            collection.contexts.len(),
            collection.workflows.len(),
        ));
        Ok(out)
    }

    /// Accept `owner/repo` exactly, or a bare repo name when unambiguous.
    fn resolve_package_key(&self, name: &str) -> Result<String, ApmError> {
        let installed = installed_packages(&self.modules_root());
        if name.contains('/') {
            if installed.iter().any(|(key, _)| key == name) {
                return Ok(name.to_string());
            }
            return Err(ApmError::Config(format!(
                "package `{name}` is not installed under {MODULES_DIR}/"
            )));
        }
        let matches: Vec<&String> = installed
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.split('/').next_back() == Some(name))
            .collect();
        match matches.as_slice() {
            [key] => Ok((*key).clone()),
            [] => Err(ApmError::Config(format!(
                "package `{name}` is not installed under {MODULES_DIR}/"
            ))),
            _ => Err(ApmError::Config(format!(
                "package name `{name}` is ambiguous; use owner/repo"
            ))),
        }
    }

    fn handle_compile(
        &self,
        options: &CompileOptions,
        watch: bool,
        validate: bool,
        format: &str,
    ) -> Result<CommandResult, ApmError> {
        if validate {
            let (collection, warnings) = validate_project(&self.workspace_root);
            let output = format_validation_text(collection.total(), &warnings);
            let exit_code = if warnings.is_empty() { 0 } else { 1 };
            return Ok(CommandResult { output, exit_code });
        }

        if watch {
            crate::tooling::watch::watch_and_compile(&self.workspace_root, options)?;
            return Ok("Watch stopped\n".to_string().into());
        }

        let report = compile_project(&self.workspace_root, options)?;
        if format == "json" {
            let rel = |paths: &[PathBuf]| -> Vec<String> {
                paths
                    .iter()
                    .map(|p| {
                        p.strip_prefix(&self.workspace_root)
                            .unwrap_or(p)
                            .to_string_lossy()
                            .replace('\\', "/")
                    })
                    .collect()
            };
            let body = serde_json::json!({
                "primitives": report.primitives,
                "instructions": report.instructions,
                "dry_run": report.dry_run,
                "metrics": report.metrics,
                "written": rel(&report.emit.written),
                "unchanged": rel(&report.emit.unchanged),
                "deleted": rel(&report.emit.deleted),
                "warnings": report.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
            });
            let output = serde_json::to_string_pretty(&body)
                .map_err(|e| ApmError::Config(e.to_string()))?;
            return Ok(output.into());
        }
        Ok(format_compile_report_text(&report, &self.workspace_root).into())
    }

    fn handle_run(&self, script: &str, params: &[String]) -> Result<CommandResult, ApmError> {
        let manifest = self.manifest()?;
        let params = workflow::parse_params(params)?;
        let prepared = workflow::prepare_script(&self.workspace_root, &manifest, script, &params)?;
        let exit_code = workflow::run_script(&self.workspace_root, &prepared)?;
        Ok(CommandResult {
            output: String::new(),
            exit_code,
        })
    }

    fn handle_preview(&self, script: &str, params: &[String]) -> Result<CommandResult, ApmError> {
        let manifest = self.manifest()?;
        let params = workflow::parse_params(params)?;
        let prepared = workflow::prepare_script(&self.workspace_root, &manifest, script, &params)?;

        let mut out = String::new();
        out.push_str(&format!("{}\n\n", format_section_heading(script)));
        out.push_str(&format!("Command: {}\n", prepared.command));
        if let Some(body) = &prepared.prompt_body {
            let path = prepared
                .prompt_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            out.push_str(&format!("Prompt ({path}):\n\n{body}"));
            if !body.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out.into())
    }
}

/// Build the GitHub source; `APM_API_BASE` overrides the API endpoint
/// (used by tests against a local server).
fn github_source() -> Result<GitHubSource, ApmError> {
    match std::env::var("APM_API_BASE") {
        Ok(base) if !base.is_empty() => GitHubSource::with_api_base(&base),
        _ => GitHubSource::new(),
    }
}
