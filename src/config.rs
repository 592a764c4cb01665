//! Environment-derived settings shared by the three roles. Secrets are read
//! once at startup and never written back to disk.

use std::path::{Path, PathBuf};

use crate::paths;
use crate::plan::Agent;

#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub runner_codex: PathBuf,
    pub runner_claude: PathBuf,
    pub gh_bin: String,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let base_dir = paths::default_base_dir();
        Self::for_base_dir(base_dir)
    }

    pub fn for_base_dir(base_dir: PathBuf) -> Self {
        let runner_codex = env_nonempty("ZOE_RUNNER_CODEX")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("agents").join("run-codex-agent.sh"));
        let runner_claude = env_nonempty("ZOE_RUNNER_CLAUDE")
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("agents").join("run-claude-agent.sh"));

        Self {
            base_dir,
            runner_codex,
            runner_claude,
            gh_bin: env_nonempty("ZOE_GH_BIN").unwrap_or_else(|| "gh".to_string()),
            webhook_url: env_nonempty("ZOE_WEBHOOK_URL")
                .or_else(|| env_nonempty("DISCORD_WEBHOOK_URL")),
            webhook_token: env_nonempty("ZOE_WEBHOOK_TOKEN"),
        }
    }

    pub fn runner_for(&self, agent: Agent) -> &Path {
        match agent {
            Agent::Codex => &self.runner_codex,
            Agent::Claude => &self.runner_claude,
        }
    }
}
