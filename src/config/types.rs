use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which web chat a task is driven against.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
pub enum AgentType {
    #[default]
    #[serde(rename = "claude_web")]
    ClaudeWeb,
    #[serde(rename = "chatgpt_web")]
    ChatGptWeb,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeWeb => "claude_web",
            Self::ChatGptWeb => "chatgpt_web",
        }
    }

    /// Map a short CLI provider name (`claude`, `chatgpt`) to an agent type.
    /// Unrecognised names fall back to Claude.
    pub fn from_provider(provider: &str) -> Self {
        match provider.to_ascii_lowercase().as_str() {
            "chatgpt" | "chatgpt_web" => Self::ChatGptWeb,
            _ => Self::ClaudeWeb,
        }
    }

    pub fn default_folder_prefix(&self) -> &'static str {
        match self {
            Self::ClaudeWeb => "claudeGUI",
            Self::ChatGptWeb => "chatgptGUI",
        }
    }

    pub fn default_model_name(&self) -> &'static str {
        match self {
            Self::ClaudeWeb => "Opus 4.5",
            Self::ChatGptWeb => "GPT-5.2",
        }
    }

    pub fn default_check_interval_secs(&self) -> u64 {
        match self {
            Self::ClaudeWeb => 2,
            Self::ChatGptWeb => 3,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective configuration of one task, after template merging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    pub agent_type: AgentType,
    pub task_name: String,
    pub task_id: Option<i64>,
    pub task_source: String,
    /// A single string is accepted as a one-prompt list.
    #[serde(deserialize_with = "one_or_many")]
    pub prompts: Vec<String>,
    pub files_to_upload: Vec<PathBuf>,
    pub upload_to_cloud: bool,
    /// Batch-level wall-clock limit for the whole task process, in seconds.
    pub timeout: Option<u64>,
    pub claude_web: ProviderSettings,
    pub chatgpt_web: ProviderSettings,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(prompt) => vec![prompt],
        OneOrMany::Many(prompts) => prompts,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            agent_type: AgentType::default(),
            task_name: "unnamed_task".into(),
            task_id: None,
            task_source: "claude_web".into(),
            prompts: Vec::new(),
            files_to_upload: Vec::new(),
            upload_to_cloud: false,
            timeout: None,
            claude_web: ProviderSettings::default(),
            chatgpt_web: ProviderSettings::default(),
        }
    }
}

impl TaskConfig {
    /// Settings section of the active provider.
    pub fn provider(&self) -> &ProviderSettings {
        match self.agent_type {
            AgentType::ClaudeWeb => &self.claude_web,
            AgentType::ChatGptWeb => &self.chatgpt_web,
        }
    }

    pub fn agent_name(&self) -> String {
        self.provider()
            .session
            .agent_name
            .clone()
            .unwrap_or_else(|| self.agent_type.as_str().to_string())
    }

    pub fn folder_prefix(&self) -> String {
        self.provider()
            .output
            .folder_prefix
            .clone()
            .unwrap_or_else(|| self.agent_type.default_folder_prefix().to_string())
    }

    pub fn model_name(&self) -> String {
        self.provider()
            .agent_model_name
            .clone()
            .unwrap_or_else(|| self.agent_type.default_model_name().to_string())
    }

    /// Whole-task budget in seconds; 0 means unlimited.
    pub fn max_sec_per_task(&self) -> u64 {
        let provider = self.provider();
        provider
            .retry
            .max_sec_per_task
            .or(provider.max_sec_per_task)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub project_id: Option<String>,
    pub project_slug: Option<String>,
    pub project_url: Option<String>,
    pub max_wait_per_prompt_seconds: u64,
    pub check_interval_seconds: Option<u64>,
    pub min_response_chars: usize,
    /// Overrides the post-start elapsed floor (300s in agent mode, 15s otherwise).
    pub min_elapsed_seconds: Option<u64>,
    pub agent_mode: bool,
    pub extended_thinking: bool,
    pub enable_extended_thinking: bool,
    pub enable_web_search: bool,
    pub max_sec_per_task: Option<u64>,
    pub agent_model_name: Option<String>,
    pub agent_model_type: Option<String>,
    pub expected_extensions: Vec<String>,
    pub retry: RetrySettings,
    pub output: OutputSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
    pub browser: BrowserSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            project_slug: None,
            project_url: None,
            max_wait_per_prompt_seconds: 1800,
            check_interval_seconds: None,
            min_response_chars: 50,
            min_elapsed_seconds: None,
            agent_mode: true,
            extended_thinking: true,
            enable_extended_thinking: true,
            enable_web_search: true,
            max_sec_per_task: None,
            agent_model_name: None,
            agent_model_type: None,
            expected_extensions: vec![".xlsx".into(), ".xls".into()],
            retry: RetrySettings::default(),
            output: OutputSettings::default(),
            session: SessionSettings::default(),
            logging: LoggingSettings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_agent_attempts: u32,
    pub max_total_attempts: u32,
    pub max_sec_per_task: Option<u64>,
    pub max_sec_per_attempt: u64,
    pub sleep_between_retries: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_agent_attempts: 3,
            max_total_attempts: 10,
            max_sec_per_task: None,
            max_sec_per_attempt: 1800,
            sleep_between_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    pub base_dir: PathBuf,
    pub folder_prefix: Option<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { base_dir: PathBuf::from("."), folder_prefix: None }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    pub agent_name: Option<String>,
    pub prompt_version: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { agent_name: None, prompt_version: 1 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub save_to_file: bool,
    pub log_directory: PathBuf,
    pub conversation_directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            save_to_file: true,
            log_directory: PathBuf::from("logs"),
            conversation_directory: PathBuf::from("logs/conversations"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowserMode {
    /// Attach to a real Chrome over the DevTools protocol.
    #[default]
    #[serde(alias = "chrome", alias = "chrome_canary")]
    Cdp,
    /// Launch a bundled Chromium with a stored auth state.
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cdp => "cdp",
            Self::Chromium => "chromium",
            Self::Firefox => "firefox",
            Self::Webkit => "webkit",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    #[serde(rename = "type")]
    pub mode: BrowserMode,
    pub cdp_port: u16,
    pub profile_dir: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub download_dir: Option<PathBuf>,
    pub node_path: String,
    pub auth_timeout_seconds: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            mode: BrowserMode::Cdp,
            cdp_port: 9222,
            profile_dir: None,
            chrome_path: None,
            headless: false,
            download_dir: None,
            node_path: "node".into(),
            auth_timeout_seconds: 300,
        }
    }
}

impl BrowserSettings {
    /// Chrome user-data dir; defaults to `~/.autowebprompt-chrome-profile`.
    pub fn resolved_profile_dir(&self) -> PathBuf {
        if let Some(dir) = &self.profile_dir {
            return dir.clone();
        }
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".autowebprompt-chrome-profile")
    }

    pub fn auth_state_path(&self) -> PathBuf {
        self.resolved_profile_dir().join("auth_state.json")
    }
}
