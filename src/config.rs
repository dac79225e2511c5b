//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COACH__*` 覆盖（双下划线表示嵌套，如 `COACH__LLM__PROVIDER=deepseek`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
    pub agent: AgentSection,
    pub log: LoggingSection,
}

/// [llm] 段：生成后端选择、温度与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 未设置时使用后端默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY / DEEPSEEK_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            stream_timeout_secs: default_stream_timeout(),
        }
    }
}

/// [embedding] 段：向量化模型
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    /// 关闭时长期记忆退化为离线哈希向量
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// [memory] 段：工作记忆 TTL、历史上限、检索条数、数据库路径
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_ttl_minutes")]
    pub working_ttl_minutes: u64,
    #[serde(default = "default_max_session_messages")]
    pub max_session_messages: usize,
    /// 后台清理过期会话的间隔（秒）
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,
    /// SQLite 文件路径；未设置时使用内存数据库
    pub database_path: Option<PathBuf>,
}

fn default_ttl_minutes() -> u64 {
    60
}

fn default_max_session_messages() -> usize {
    50
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_search_limit() -> usize {
    5
}

fn default_max_insights() -> usize {
    50
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            working_ttl_minutes: default_ttl_minutes(),
            max_session_messages: default_max_session_messages(),
            cleanup_interval_secs: default_cleanup_interval(),
            search_limit: default_search_limit(),
            max_insights: default_max_insights(),
            database_path: None,
        }
    }
}

/// [tools] 段：工具超时与查询窗口
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_history_limit() -> usize {
    20
}

fn default_recent_days() -> i64 {
    14
}

fn default_recent_limit() -> usize {
    10
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            history_limit: default_history_limit(),
            recent_days: default_recent_days(),
            recent_limit: default_recent_limit(),
        }
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 每次细化的周数
    #[serde(default = "default_cycle_weeks")]
    pub cycle_weeks: usize,
    #[serde(default = "default_true")]
    pub trace_enabled: bool,
}

fn default_cycle_weeks() -> usize {
    4
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            cycle_weeks: default_cycle_weeks(),
            trace_enabled: true,
        }
    }
}

/// [log] 段：级别与输出格式（console / json）
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COACH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COACH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COACH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert!((cfg.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.memory.working_ttl_minutes, 60);
        assert_eq!(cfg.memory.max_insights, 50);
        assert_eq!(cfg.tools.recent_days, 14);
        assert_eq!(cfg.agent.cycle_weeks, 4);
        assert_eq!(cfg.embedding.dimensions, 1536);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coach.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"mock\"\ntemperature = 0.2\n\n[memory]\nworking_ttl_minutes = 5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert!((cfg.llm.temperature - 0.2).abs() < 1e-6);
        assert_eq!(cfg.memory.working_ttl_minutes, 5);
        assert_eq!(cfg.memory.search_limit, 5);
    }
}
