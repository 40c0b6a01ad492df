//! Script preparation: `${input:<name>}` parameter substitution and
//! subprocess handoff for `run` and `preview`.
//!
//! Substitution is a pre-execution text transform; execution itself is a
//! thin shell wrapper with the environment passed through unchanged.

use crate::error::ApmError;
use crate::manifest::Manifest;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{input:([A-Za-z0-9_.-]+)\}").expect("static regex"))
}

/// Parse repeated `--param k=v` arguments.
pub fn parse_params(args: &[String]) -> Result<BTreeMap<String, String>, ApmError> {
    let mut params = BTreeMap::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(ApmError::Config(format!(
                "invalid --param `{arg}`: expected key=value"
            )));
        };
        params.insert(key.trim().to_string(), value.to_string());
    }
    Ok(params)
}

/// Placeholder names referenced by `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for caps in placeholder_regex().captures_iter(text) {
        let name = caps[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Replace every `${input:name}`; an undefined parameter fails.
pub fn substitute(
    text: &str,
    params: &BTreeMap<String, String>,
    script: &str,
) -> Result<String, ApmError> {
    for name in placeholders(text) {
        if !params.contains_key(&name) {
            return Err(ApmError::MissingParameter {
                script: script.to_string(),
                name,
            });
        }
    }
    let result = placeholder_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        params[&caps[1]].clone()
    });
    Ok(result.into_owned())
}

/// A script ready to execute: substituted command plus, when the command
/// references a workflow file, its substituted body.
#[derive(Debug)]
pub struct PreparedScript {
    pub name: String,
    pub command: String,
    /// The referenced `.prompt.md`, if the command names one that exists.
    pub prompt_path: Option<PathBuf>,
    /// The workflow body after substitution.
    pub prompt_body: Option<String>,
}

/// Look up `name` in the manifest scripts and substitute parameters into
/// the command string and any referenced workflow body.
pub fn prepare_script(
    project_root: &Path,
    manifest: &Manifest,
    name: &str,
    params: &BTreeMap<String, String>,
) -> Result<PreparedScript, ApmError> {
    let raw_command = manifest
        .scripts
        .get(name)
        .ok_or_else(|| ApmError::UnknownScript {
            name: name.to_string(),
        })?;

    let command = substitute(raw_command, params, name)?;

    let prompt_path = command
        .split_whitespace()
        .find(|token| token.ends_with(".prompt.md"))
        .map(|token| project_root.join(token))
        .filter(|path| path.is_file());

    let prompt_body = match &prompt_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| ApmError::io(path, e))?;
            let (_, body) = crate::markdown::split_frontmatter(&text, path)?;
            Some(substitute(&body, params, name)?)
        }
        None => None,
    };

    Ok(PreparedScript {
        name: name.to_string(),
        command,
        prompt_path,
        prompt_body,
    })
}

/// Execute a prepared script via the host shell, passing the environment
/// through unchanged. Returns the child's exit code.
///
/// When the command references a workflow file, the substituted body is
/// written to a temp file and the command token is rewritten to point at
/// it, so the original file stays untouched.
pub fn run_script(project_root: &Path, prepared: &PreparedScript) -> Result<i32, ApmError> {
    let mut command = prepared.command.clone();

    // Kept alive until the child exits.
    let _compiled: Option<tempfile::NamedTempFile> = match (&prepared.prompt_path, &prepared.prompt_body)
    {
        (Some(path), Some(body)) => {
            let mut temp = tempfile::Builder::new()
                .suffix(".prompt.md")
                .tempfile()
                .map_err(|e| ApmError::io(path, e))?;
            temp.write_all(body.as_bytes())
                .map_err(|e| ApmError::io(path, e))?;
            let original_token = path
                .strip_prefix(project_root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            command = command.replace(&original_token, &temp.path().to_string_lossy());
            Some(temp)
        }
        _ => None,
    };

    info!(script = %prepared.name, command = %command, "running script");
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(project_root)
        .status()
        .map_err(|e| ApmError::Config(format!("failed to spawn `{command}`: {e}")))?;

    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn manifest_with_script(script: &str) -> Manifest {
        let text = format!(
            "name: demo\nversion: '1'\nscripts:\n  start: \"{script}\"\n"
        );
        Manifest::parse(&text, Path::new("apm.yml")).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_named_parameters() {
        let out = substitute(
            "Say hello to ${input:name} in ${input:language}.",
            &params(&[("name", "Ada"), ("language", "French")]),
            "start",
        )
        .unwrap();
        assert_eq!(out, "Say hello to Ada in French.");
    }

    #[test]
    fn missing_parameter_names_script_and_param() {
        let err = substitute("Hi ${input:name}", &params(&[]), "start").unwrap_err();
        match err {
            ApmError::MissingParameter { script, name } => {
                assert_eq!(script, "start");
                assert_eq!(name, "name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn repeated_placeholder_substituted_everywhere() {
        let out = substitute(
            "${input:x} and ${input:x}",
            &params(&[("x", "1")]),
            "s",
        )
        .unwrap();
        assert_eq!(out, "1 and 1");
    }

    #[test]
    fn parse_params_rejects_bare_values() {
        assert!(parse_params(&["novalue".to_string()]).is_err());
        let parsed = parse_params(&["k=v".to_string(), "a=b=c".to_string()]).unwrap();
        assert_eq!(parsed["k"], "v");
        assert_eq!(parsed["a"], "b=c");
    }

    #[test]
    fn prepare_loads_and_substitutes_referenced_workflow() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(
            root.join("hello.prompt.md"),
            "---\ninput: [name]\n---\nHello ${input:name}!\n",
        )
        .unwrap();

        let manifest = manifest_with_script("codex hello.prompt.md");
        let prepared =
            prepare_script(root, &manifest, "start", &params(&[("name", "Ada")])).unwrap();
        assert_eq!(prepared.command, "codex hello.prompt.md");
        assert_eq!(prepared.prompt_body.as_deref(), Some("Hello Ada!\n"));
    }

    #[test]
    fn unknown_script_is_an_error() {
        let manifest = manifest_with_script("true");
        let err = prepare_script(Path::new("."), &manifest, "missing", &params(&[])).unwrap_err();
        assert!(matches!(err, ApmError::UnknownScript { .. }));
    }

    #[test]
    fn run_passes_through_child_exit_code() {
        let temp = TempDir::new().unwrap();
        let manifest = manifest_with_script("exit 7");
        let prepared = prepare_script(temp.path(), &manifest, "start", &params(&[])).unwrap();
        let code = run_script(temp.path(), &prepared).unwrap();
        assert_eq!(code, 7);
    }
}
