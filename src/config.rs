use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// OpenAI-compatible endpoint URL
    pub endpoint: String,
    /// Model identifier, used by agents that don't name their own
    pub model: String,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    /// Optional: cost per 1M input tokens in USD, used for the stats panel estimate.
    /// Output tokens are priced at 3× this rate.
    pub cost_per_mtok_input: Option<f64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen3:14b".to_string(),
            api_key: None,
            cost_per_mtok_input: None,
        }
    }
}

// ── Agents ────────────────────────────────────────────────────────────────────

/// One member of the quorum. Unset endpoint/model/api_key fall back to the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_agent_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Short role line appended to the system prompt ("reviewer", "architect").
    #[serde(default)]
    pub role: Option<String>,
}

fn default_agent_color() -> String {
    "cyan".to_string()
}

fn default_true() -> bool {
    true
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub history_capacity: usize,
    pub prompt_history_capacity: usize,
    pub chat_timeout_secs: u64,
    pub workflow_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            prompt_history_capacity: 500,
            chat_timeout_secs: 300,
            workflow_timeout_secs: 3600,
        }
    }
}

impl SessionConfig {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs.max(1))
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub debounce_ms: u64,
    pub batch_cap: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, batch_cap: 50 }
    }
}

impl EventsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub theme: String,
    pub explorer: bool,
    pub logs: bool,
    pub stats: bool,
    pub tokens: bool,
    pub log_capacity: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            explorer: false,
            logs: true,
            stats: false,
            tokens: true,
            log_capacity: 1000,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub ui: UiConfig,

    /// Where workflows, prompt history and the log file live.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            profiles: HashMap::new(),
            agents: Vec::new(),
            session: SessionConfig::default(),
            events: EventsConfig::default(),
            ui: UiConfig::default(),
            state_dir: None,
        }
    }
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    pub cost_per_mtok_input: Option<f64>,
    /// Never empty: without an `[[agents]]` table the profile itself is the only agent.
    pub agents: Vec<AgentConfig>,
    pub session: SessionConfig,
    pub events: EventsConfig,
    pub ui: UiConfig,
    pub state_dir: PathBuf,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
        api_key_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        let model = model_override.map(str::to_string).unwrap_or(base.model);

        let agents = if file.agents.is_empty() {
            vec![AgentConfig {
                name: profile_name.clone(),
                color: default_agent_color(),
                enabled: true,
                endpoint: None,
                model: None,
                api_key: None,
                role: None,
            }]
        } else {
            file.agents.clone()
        };

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            model,
            api_key: api_key_override
                .map(str::to_string)
                .or(base.api_key),
            profile_name,
            cost_per_mtok_input: base.cost_per_mtok_input,
            agents,
            session: file.session.clone(),
            events: file.events.clone(),
            ui: file.ui.clone(),
            state_dir: file.state_dir.clone().unwrap_or_else(default_state_dir),
        }
    }

    /// Endpoint, model and key for one agent, profile values filling the gaps.
    pub fn agent_backend(&self, agent: &AgentConfig) -> (String, String, Option<String>) {
        (
            agent.endpoint.clone().unwrap_or_else(|| self.endpoint.clone()),
            agent.model.clone().unwrap_or_else(|| self.model.clone()),
            agent.api_key.clone().or_else(|| self.api_key.clone()),
        )
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quorum")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS, %APPDATA% on Windows
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

pub fn default_state_dir() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".local/state")
        })
        .join("quorum")
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# quorum configuration
# Run `quorum --init` to regenerate this file.

default_profile = "local"

# ── Local Ollama (default) ────────────────────────────────────────────────────
[profiles.local]
endpoint = "http://localhost:11434"
model    = "qwen3:14b"

# ── OpenAI ───────────────────────────────────────────────────────────────────
# [profiles.openai]
# endpoint            = "https://api.openai.com/v1"
# model               = "gpt-4o"
# api_key             = "sk-..."
# cost_per_mtok_input = 2.5   # USD per 1M input tokens, output priced at 3x

# ── Agents ───────────────────────────────────────────────────────────────────
# Each agent is one member of the quorum. Without any [[agents]] the active
# profile acts as a single agent.
#
# [[agents]]
# name  = "architect"
# color = "magenta"
# role  = "Focus on structure and interfaces"
#
# [[agents]]
# name  = "reviewer"
# color = "green"
# model = "qwen3:8b"
# role  = "Look for bugs and missing edge cases"
#
# [[agents]]
# name    = "cloud"
# enabled = false
# endpoint = "https://openrouter.ai/api/v1"
# model    = "qwen/qwen-2.5-coder-32b-instruct"
# api_key  = "sk-or-..."

# [session]
# history_capacity      = 500
# chat_timeout_secs     = 300
# workflow_timeout_secs = 3600

# [events]
# debounce_ms = 100
# batch_cap   = 50

# [ui]
# theme    = "dark"   # or "light"
# explorer = false
# logs     = true
# stats    = false
# tokens   = true

# state_dir = "/home/me/.local/state/quorum"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses() {
        let cfg: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(cfg.default_profile, "local");
        assert!(cfg.profiles.contains_key("local"));
        assert_eq!(cfg.session, SessionConfig::default());
        assert_eq!(cfg.events.batch_cap, 50);
    }

    #[test]
    fn test_sections_and_agents() {
        let raw = r#"
            default_profile = "p"
            state_dir = "/tmp/q"
            [profiles.p]
            endpoint = "http://e"
            model = "m"
            [[agents]]
            name = "a"
            [[agents]]
            name = "b"
            enabled = false
            model = "small"
            [session]
            chat_timeout_secs = 5
            [ui]
            theme = "light"
        "#;
        let cfg: ConfigFile = toml::from_str(raw).unwrap();
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[0].color, "cyan");
        assert!(cfg.agents[0].enabled);
        assert!(!cfg.agents[1].enabled);
        assert_eq!(cfg.session.chat_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.session.history_capacity, 500);
        assert!(cfg.ui.logs);

        let r = ResolvedConfig::resolve(&cfg, None, None, None, None);
        assert_eq!(r.state_dir, PathBuf::from("/tmp/q"));
        let (endpoint, model, _) = r.agent_backend(&r.agents[1]);
        assert_eq!((endpoint.as_str(), model.as_str()), ("http://e", "small"));
    }

    #[test]
    fn test_cli_overrides_win_and_single_agent_fallback() {
        let cfg: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        let r = ResolvedConfig::resolve(&cfg, None, Some("http://other"), Some("big"), Some("k"));
        assert_eq!(r.endpoint, "http://other");
        assert_eq!(r.model, "big");
        assert_eq!(r.api_key.as_deref(), Some("k"));
        assert_eq!(r.agents.len(), 1);
        assert_eq!(r.agents[0].name, "local");
    }

    #[test]
    fn test_parse_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_profile = [").unwrap();
        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
        assert!(ConfigFile::load_from(&dir.path().join("missing.toml")).is_ok());
    }

    #[test]
    fn test_missing_file_resolves_to_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile::load_from(&dir.path().join("missing.toml")).unwrap();
        let r = ResolvedConfig::resolve(&cfg, None, None, None, None);
        assert_eq!(r.profile_name, "default");
        assert_eq!(r.agents[0].name, "default");
        assert_eq!(r.model, Profile::default().model);
    }
}
