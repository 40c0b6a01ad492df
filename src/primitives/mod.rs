//! Typed context primitives: chatmodes, instructions, contexts, workflows.
//!
//! A primitive is a Markdown file with YAML frontmatter, classified by its
//! file suffix. Discovery walks configured roots, validates each file, and
//! produces a deterministic [`PrimitiveCollection`].

pub mod discovery;

use serde::Serialize;
use std::path::PathBuf;

pub use discovery::{discover_primitives, DiscoveryOutcome, DiscoveryRoot};

/// Where a primitive was found; locals shadow dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "package")]
pub enum PrimitiveSource {
    Local,
    /// A dependency, keyed `owner/repo`.
    Dependency(String),
}

/// The four primitive kinds, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Chatmode,
    Instruction,
    Context,
    Workflow,
}

impl PrimitiveKind {
    /// Classify a file name by its suffix, if it is a primitive at all.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".chatmode.md") {
            Some(Self::Chatmode)
        } else if name.ends_with(".instructions.md") {
            Some(Self::Instruction)
        } else if name.ends_with(".context.md") || name.ends_with(".memory.md") {
            Some(Self::Context)
        } else if name.ends_with(".prompt.md") {
            Some(Self::Workflow)
        } else {
            None
        }
    }

    /// Strip the kind suffix from a file name to derive the default name.
    pub fn strip_suffix(self, file_name: &str) -> String {
        let suffixes: &[&str] = match self {
            Self::Chatmode => &[".chatmode.md"],
            Self::Instruction => &[".instructions.md"],
            Self::Context => &[".context.md", ".memory.md"],
            Self::Workflow => &[".prompt.md"],
        };
        for suffix in suffixes {
            if let Some(stem) = file_name.strip_suffix(suffix) {
                return stem.to_string();
            }
        }
        file_name.to_string()
    }
}

/// A persona definition prepended to root-level output.
#[derive(Debug, Clone, Serialize)]
pub struct Chatmode {
    pub name: String,
    pub description: String,
    pub apply_to: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub body: String,
    pub source_path: PathBuf,
    pub source: PrimitiveSource,
}

/// A placement-driven rule; `apply_to` selects the files it governs.
#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    pub name: String,
    pub description: String,
    pub apply_to: String,
    pub author: Option<String>,
    pub version: Option<String>,
    pub body: String,
    pub source_path: PathBuf,
    pub source: PrimitiveSource,
}

/// Free-form background context (`.context.md` / `.memory.md`).
#[derive(Debug, Clone, Serialize)]
pub struct ContextFile {
    pub name: String,
    pub description: Option<String>,
    pub body: String,
    pub source_path: PathBuf,
    pub source: PrimitiveSource,
}

/// A runnable prompt (`.prompt.md`) referenced by manifest scripts.
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    pub mode: Option<String>,
    /// Ordered parameter names substituted as `${input:<name>}`.
    pub input: Vec<String>,
    /// MCP servers the workflow declares it needs.
    pub mcp: Vec<String>,
    pub body: String,
    pub source_path: PathBuf,
    pub source: PrimitiveSource,
}

/// All primitives discovered for one compile, ordered deterministically.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrimitiveCollection {
    pub chatmodes: Vec<Chatmode>,
    pub instructions: Vec<Instruction>,
    pub contexts: Vec<ContextFile>,
    pub workflows: Vec<Workflow>,
}

impl PrimitiveCollection {
    pub fn is_empty(&self) -> bool {
        self.chatmodes.is_empty()
            && self.instructions.is_empty()
            && self.contexts.is_empty()
            && self.workflows.is_empty()
    }

    pub fn total(&self) -> usize {
        self.chatmodes.len() + self.instructions.len() + self.contexts.len() + self.workflows.len()
    }

    /// Look up a chatmode by name.
    pub fn chatmode(&self, name: &str) -> Option<&Chatmode> {
        self.chatmodes.iter().find(|c| c.name == name)
    }

    /// Union of MCP servers declared by workflows, sorted and deduplicated.
    pub fn mcp_servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self
            .workflows
            .iter()
            .flat_map(|w| w.mcp.iter().cloned())
            .collect();
        servers.sort();
        servers.dedup();
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_suffix() {
        assert_eq!(
            PrimitiveKind::from_file_name("dev.chatmode.md"),
            Some(PrimitiveKind::Chatmode)
        );
        assert_eq!(
            PrimitiveKind::from_file_name("py.instructions.md"),
            Some(PrimitiveKind::Instruction)
        );
        assert_eq!(
            PrimitiveKind::from_file_name("arch.context.md"),
            Some(PrimitiveKind::Context)
        );
        assert_eq!(
            PrimitiveKind::from_file_name("notes.memory.md"),
            Some(PrimitiveKind::Context)
        );
        assert_eq!(
            PrimitiveKind::from_file_name("hello.prompt.md"),
            Some(PrimitiveKind::Workflow)
        );
        assert_eq!(PrimitiveKind::from_file_name("README.md"), None);
    }

    #[test]
    fn strips_kind_suffix() {
        assert_eq!(
            PrimitiveKind::Instruction.strip_suffix("python.instructions.md"),
            "python"
        );
        assert_eq!(
            PrimitiveKind::Context.strip_suffix("notes.memory.md"),
            "notes"
        );
    }

    #[test]
    fn mcp_servers_sorted_and_deduped() {
        let mut collection = PrimitiveCollection::default();
        for (name, mcp) in [("b", vec!["s2", "s1"]), ("a", vec!["s1"])] {
            collection.workflows.push(Workflow {
                name: name.to_string(),
                description: None,
                mode: None,
                input: Vec::new(),
                mcp: mcp.into_iter().map(String::from).collect(),
                body: "x".to_string(),
                source_path: PathBuf::from(format!("{name}.prompt.md")),
                source: PrimitiveSource::Local,
            });
        }
        assert_eq!(collection.mcp_servers(), vec!["s1", "s2"]);
    }
}
