// 配置加载：YAML 文件 + 环境变量覆盖，缺省值保持可直接启动。
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/taskwise.yaml";

const DEFAULT_INSTRUCTIONS: &str = "You are TaskWise, a friendly task management assistant. \
You help the user create, list, complete, update and delete their tasks by calling the \
available tools. Use list_tasks before completing, updating or deleting a task when the \
user refers to one by name rather than by id. When a tool reports an error, explain the \
problem to the user in plain language instead of repeating the same call. Keep replies \
short and concrete, and confirm what you actually did.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_s: Option<u64>,
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_s.filter(|value| *value > 0).unwrap_or(60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub context_message_limit: i64,
    pub session_timeout_minutes: i64,
    pub max_tool_rounds: i64,
    pub tool_timeout_s: u64,
    pub instructions: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            context_message_limit: 10,
            session_timeout_minutes: 30,
            max_tool_rounds: 5,
            tool_timeout_s: 30,
            instructions: None,
        }
    }
}

impl AgentConfig {
    pub fn system_instructions(&self) -> String {
        self.instructions
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTIONS)
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: String,
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            db_path: "./data/taskwise.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

pub fn load_config() -> Config {
    let path =
        env::var("TASKWISE_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(Path::new(&path))
}

pub fn load_config_from(path: &Path) -> Config {
    match fs::read_to_string(path) {
        Ok(text) => match serde_yaml::from_str::<Config>(&text) {
            Ok(config) => config,
            Err(err) => {
                warn!("配置文件解析失败，使用默认配置: {err}");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}
