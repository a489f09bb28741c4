//! LLM 客户端抽象
//!
//! 循环只依赖 LlmClient::complete：输入对话历史、工具能力列表、可选的结果 schema，
//! 输出「工具调用请求」或「最终文本」。具体线协议由各后端负责。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolInvocationRequest};
use crate::tools::{json_schema_for, ToolSpecification};

/// 模型服务错误（对循环而言不可恢复）
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model refused: {0}")]
    Refusal(String),
}

/// Token 使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// 两次累计值之差
    pub fn since(&self, earlier: &Usage) -> Usage {
        Usage::new(
            self.prompt_tokens.saturating_sub(earlier.prompt_tokens),
            self.completion_tokens.saturating_sub(earlier.completion_tokens),
        )
    }
}

/// 约束最终输出的 JSON Schema
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: Value,
    pub strict: bool,
}

impl OutputSchema {
    pub fn for_type<T: JsonSchema>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: json_schema_for::<T>(),
            strict: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// 一次模型调用的输入
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpecification],
    pub output_schema: Option<&'a OutputSchema>,
}

/// 一次模型调用的输出：tool_calls 非空表示需要执行工具，否则 content 为最终结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocationRequest>,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolInvocationRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError>;

    /// 累计 token 使用统计；默认不统计
    fn token_usage(&self) -> Usage {
        Usage::default()
    }
}
