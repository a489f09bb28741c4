//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：第一轮请求抓取首条用户消息里的 URL，拿到工具结果后给出最小化的最终 JSON。
//! - ScriptedLlmClient：按脚本依次返回预设响应，并记录每次调用看到的请求，便于测试循环行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse};
use crate::memory::{Message, ToolInvocationRequest};
use crate::tools::FETCH_PAGE_TEXT;

fn url_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>)]+"#).ok())
        .as_ref()
}

fn first_url(messages: &[Message]) -> Option<String> {
    let content = messages.iter().find_map(|m| match m {
        Message::User { content } => Some(content.as_str()),
        _ => None,
    })?;
    url_pattern()?
        .find(content)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
}

/// 离线客户端：fetch 一次后结束
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        let url = first_url(request.messages);
        let fetched = request
            .messages
            .iter()
            .any(|m| matches!(m, Message::ToolResponse { .. }));
        let can_fetch = request.tools.iter().any(|t| t.name == FETCH_PAGE_TEXT);

        if let (Some(url), false, true) = (&url, fetched, can_fetch) {
            let args = json!({ "url": url }).to_string();
            return Ok(ModelResponse::with_tool_calls(vec![ToolInvocationRequest::new(
                "mock_call_1",
                FETCH_PAGE_TEXT,
                args,
            )]));
        }

        let payload = match url {
            Some(url) => json!({ "website": url }),
            None => json!({}),
        };
        Ok(ModelResponse::text(payload.to_string()))
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub has_output_schema: bool,
}

/// 脚本客户端：按顺序返回响应；脚本用完后重复最后一条（脚本为空则报错）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelResponse, String>>>,
    last: Mutex<Option<Result<ModelResponse, String>>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    /// Err 项模拟模型服务失败
    pub fn from_results(responses: Vec<Result<ModelResponse, String>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// 每轮都请求同一个工具，从不给出最终结果
    pub fn always_tool_calls(tool_name: &str, raw_arguments: &str) -> Self {
        Self::new(vec![ModelResponse::with_tool_calls(vec![
            ToolInvocationRequest::new("call_loop", tool_name, raw_arguments),
        ])])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_response(&self) -> Option<Result<ModelResponse, String>> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match script.pop_front() {
            Some(next) => {
                *last = Some(next.clone());
                Some(next)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                system: request.system.map(String::from),
                messages: request.messages.to_vec(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
                has_output_schema: request.output_schema.is_some(),
            });

        match self.next_response() {
            Some(Ok(mut response)) => {
                // 保证每轮调用 ID 唯一
                for (i, call) in response.tool_calls.iter_mut().enumerate() {
                    call.call_id = format!("{}_{}_{}", call.call_id, n, i);
                }
                Ok(response)
            }
            Some(Err(e)) => Err(LlmError::ApiError(e)),
            None => Err(LlmError::InvalidResponse("script is empty".to_string())),
        }
    }
}
