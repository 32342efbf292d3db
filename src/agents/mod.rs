//! Agent definitions available to the coordinator.
//!
//! An agent is a named, tool-scoped configuration that the child program
//! realizes. Definitions are JSON files under `~/.pi/agents` (user scope) and
//! `<cwd>/.pi/agents` (project scope); project definitions shadow user ones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tool name that grants an agent permission to delegate to subagents.
pub const DELEGATION_TOOL: &str = "subagent";

/// Tools that let an agent write to the working tree directly.
pub const DIRECT_WRITE_TOOLS: &[&str] = &["write", "edit", "bash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    User,
    Project,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentScope {
    User,
    Project,
    #[default]
    Both,
}

impl FromStr for AgentScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown agent scope: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub source: AgentSource,
}

impl AgentDefinition {
    /// Whether this agent's declared tool set includes the delegation capability.
    pub fn can_delegate(&self) -> bool {
        self.tools.iter().any(|t| t.eq_ignore_ascii_case(DELEGATION_TOOL))
    }

    pub fn has_direct_write_tool(&self) -> bool {
        self.tools
            .iter()
            .any(|t| DIRECT_WRITE_TOOLS.iter().any(|w| t.eq_ignore_ascii_case(w)))
    }

    pub fn tools_csv(&self) -> Option<String> {
        if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.join(","))
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentCatalog {
    agents: BTreeMap<String, AgentDefinition>,
}

impl AgentCatalog {
    /// Load agent definitions for `scope`, project shadowing user.
    pub async fn load(cwd: &Path, scope: AgentScope) -> Self {
        let mut agents = BTreeMap::new();

        if matches!(scope, AgentScope::User | AgentScope::Both)
            && let Some(home) = home_dir()
        {
            load_dir(&home.join(".pi").join("agents"), AgentSource::User, &mut agents).await;
        }

        if matches!(scope, AgentScope::Project | AgentScope::Both) {
            load_dir(&cwd.join(".pi").join("agents"), AgentSource::Project, &mut agents).await;
        }

        Self { agents }
    }

    pub fn from_definitions(defs: impl IntoIterator<Item = AgentDefinition>) -> Self {
        Self {
            agents: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

async fn load_dir(
    dir: &Path,
    source: AgentSource,
    agents: &mut BTreeMap<String, AgentDefinition>,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<AgentDefinition>(&raw) {
                Ok(mut def) => {
                    if def.name.trim().is_empty()
                        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                    {
                        def.name = stem.to_string();
                    }
                    def.source = source;
                    debug!(agent = %def.name, source = ?source, "Loaded agent definition");
                    agents.insert(def.name.clone(), def);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed agent definition")
                }
            },
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read agent definition"),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(tools: &[&str]) -> AgentDefinition {
        AgentDefinition {
            name: "worker".into(),
            description: None,
            tools: tools.iter().map(|s| s.to_string()).collect(),
            model: None,
            source: AgentSource::Unknown,
        }
    }

    #[test]
    fn test_delegation_capability() {
        assert!(agent(&["read", "subagent"]).can_delegate());
        assert!(agent(&["Subagent"]).can_delegate());
        assert!(!agent(&["read", "grep"]).can_delegate());
    }

    #[test]
    fn test_direct_write_tools() {
        assert!(agent(&["edit"]).has_direct_write_tool());
        assert!(agent(&["bash"]).has_direct_write_tool());
        assert!(!agent(&["read", "grep"]).has_direct_write_tool());
    }

    #[test]
    fn test_tools_csv() {
        assert_eq!(agent(&["read", "edit"]).tools_csv().unwrap(), "read,edit");
        assert!(agent(&[]).tools_csv().is_none());
    }

    #[tokio::test]
    async fn test_load_project_agents() {
        let dir = tempfile::tempdir().unwrap();
        let agents_dir = dir.path().join(".pi").join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();
        std::fs::write(
            agents_dir.join("scout.json"),
            r#"{"name": "scout", "tools": ["read", "grep"]}"#,
        )
        .unwrap();
        std::fs::write(agents_dir.join("unnamed.json"), r#"{"tools": ["read"]}"#).unwrap();
        std::fs::write(agents_dir.join("broken.json"), "{nope").unwrap();

        let catalog = AgentCatalog::load(dir.path(), AgentScope::Project).await;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("scout").unwrap().source, AgentSource::Project);
        // name defaults from the file stem
        assert!(catalog.get("unnamed").is_some());
        assert!(catalog.get("broken").is_none());
    }
}
