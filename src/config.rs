//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 .env（dotenvy），再读 TOML 文件，最后用环境变量 `SCOUT__*` 覆盖
//! （双下划线表示嵌套，如 `SCOUT__LLM__PROVIDER=mock`、`SCOUT__AGENT__MAX_TURNS=5`）。
//! 模型服务的凭据不进配置文件，由 agent 在创建客户端时从环境变量读取。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::scraper::DEFAULT_USER_AGENT;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub log: LogSection,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 提示词覆盖目录（agentic.txt / single_pass.txt），未设置时用 config/prompts
    pub prompts_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：azure / openai / mock
    pub provider: String,
    /// OpenAI 模型名（azure 使用部署名）
    pub model: String,
    pub base_url: Option<String>,
    /// Azure API 版本；AZURE_OPENAI_API_VERSION 优先
    pub api_version: String,
    /// response_format 是否启用 strict
    pub strict_schema: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "azure".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_version: "2024-02-01".to_string(),
            strict_schema: false,
        }
    }
}

/// [agent] 段：循环与工具执行
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    pub max_concurrent_tools: usize,
    /// 单次工具调用超时（秒），0 表示不限
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_concurrent_tools: 5,
            tool_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub fetch: FetchSection,
}

/// [tools.fetch] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// 返回给模型的文本上限（字符），0 表示不截断
    pub max_text_chars: usize,
    pub max_links: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_text_chars: 100_000,
            max_links: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// [server] 段（scout-web）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl AppConfig {
    pub fn prompts_dir(&self) -> PathBuf {
        self.app
            .prompts_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("config/prompts"))
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let _ = dotenvy::dotenv();

    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(config::ConfigError::NotFound(path.display().to_string()));
        }
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "azure");
        assert_eq!(cfg.llm.api_version, "2024-02-01");
        assert!(!cfg.llm.strict_schema);
        assert_eq!(cfg.agent.max_turns, 10);
        assert_eq!(cfg.agent.max_concurrent_tools, 5);
        assert_eq!(cfg.agent.tool_timeout_secs, 45);
        assert_eq!(cfg.tools.fetch.timeout_secs, 30);
        assert_eq!(cfg.tools.fetch.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(cfg.tools.fetch.max_text_chars, 100_000);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.prompts_dir(), PathBuf::from("config/prompts"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"mock\"\n\n[agent]\nmax_turns = 3\n\n[tools.fetch]\nmax_links = 7"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.api_version, "2024-02-01");
        assert_eq!(cfg.agent.max_turns, 3);
        assert_eq!(cfg.agent.max_concurrent_tools, 5);
        assert_eq!(cfg.tools.fetch.max_links, 7);
        assert_eq!(cfg.tools.fetch.timeout_secs, 30);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/scout.toml")));
        assert!(err.is_err());
    }
}
