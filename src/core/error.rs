//! 错误类型
//!
//! 两层：ToolError 只在单次工具调用内部出现，由 ToolExecutor 转成失败的 ToolInvocationResult 交还模型；
//! AgentError 是循环级错误，直接作为终止结果返回给调用方。

use std::time::Duration;

use thiserror::Error;

/// 单次工具调用失败的原因（永远不会中止同批次的其他调用或整个循环）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 参数不是合法 JSON，或与工具声明的参数结构不符
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("Tool {tool} timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },

    #[error("Tool {0} panicked")]
    Panicked(String),
}

impl ToolError {
    /// 审计日志中的 outcome 字段
    pub fn outcome(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Execution(_) => "error",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Panicked(_) => "panicked",
        }
    }
}

/// 循环级错误：终止本次执行并交给调用方
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Failed to reach a final payload after {max_turns} iterations")]
    IterationLimitExceeded { max_turns: usize },

    #[error("Malformed final payload: {0}")]
    MalformedFinalPayload(String),

    /// 模型既没有请求工具，也没有给出最终结果
    #[error("Model returned neither tool calls nor a final payload")]
    NoFinalPayload,

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 调用方输入不合法（如非 http/https 的 URL）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}

impl From<crate::llm::LlmError> for AgentError {
    fn from(e: crate::llm::LlmError) -> Self {
        AgentError::LlmError(e.to_string())
    }
}
