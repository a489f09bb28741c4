//! 对话状态
//!
//! ConversationState 是循环中唯一可变的结构：只追加、不删除、不重排。
//! 工具调用请求记录在 Assistant 消息里；同一轮的全部工具结果作为一条 ToolResponse 追加。

use serde::{Deserialize, Serialize};

/// 模型在一轮中请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// 关联 ID（同一轮内唯一，对工具执行方不透明）
    pub call_id: String,
    pub tool_name: String,
    /// 模型给出的原始参数（JSON 文本，尚未解析）
    pub raw_arguments: String,
}

impl ToolInvocationRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

/// 一次工具调用的结果，与请求一一对应
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub tool_name: String,
    /// 成功时为工具输出（序列化文本），失败时为 {"success": false, "error": ...}
    pub content: String,
    pub success: bool,
}

impl ToolInvocationResult {
    pub fn success(request: &ToolInvocationRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            content: content.into(),
            success: true,
        }
    }

    pub fn failure(request: &ToolInvocationRequest, error: impl std::fmt::Display) -> Self {
        let content = serde_json::json!({
            "success": false,
            "error": error.to_string(),
        });
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            content: content.to_string(),
            success: false,
        }
    }
}

/// 单条消息（与 LLM API 的角色对应；ToolResponse 由模型适配层展开为多条 tool 消息）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocationRequest>,
    },
    ToolResponse {
        results: Vec<ToolInvocationResult>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// 记录模型本轮请求的工具调用
    pub fn assistant_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolInvocationRequest>,
    ) -> Self {
        Message::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool_response(results: Vec<ToolInvocationResult>) -> Self {
        Message::ToolResponse { results }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolResponse { .. } => "tool",
        }
    }
}

/// 完整对话历史：只追加
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一条用户消息（任务说明 + 初始输入）开始
    pub fn seeded(user_content: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.push(Message::user(user_content));
        state
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 历史中记录的工具结果总数
    pub fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                Message::ToolResponse { results } => results.len(),
                _ => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_state() {
        let state = ConversationState::seeded("extract https://example.com");
        assert_eq!(state.len(), 1);
        assert_eq!(state.messages()[0].role(), "user");
    }

    #[test]
    fn test_result_wire_round_trip() {
        let req = ToolInvocationRequest::new("call_1", "fetch_page_text", r#"{"url":"x"}"#);
        let result = ToolInvocationResult::failure(&req, "Unknown tool: nope");
        let wire = serde_json::to_string(&result).unwrap();
        let back: ToolInvocationResult = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, result);
        assert!(wire.contains(r#""call_id":"call_1""#));
    }

    #[test]
    fn test_failure_content_is_json() {
        let req = ToolInvocationRequest::new("c", "t", "{}");
        let result = ToolInvocationResult::failure(&req, "boom");
        let v: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "boom");
        assert!(!result.success);
    }

    #[test]
    fn test_message_tagging() {
        let msg = Message::tool_response(vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_response");

        let assistant = Message::assistant_tool_calls(
            None,
            vec![ToolInvocationRequest::new("a", "b", "{}")],
        );
        let json = serde_json::to_value(&assistant).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["call_id"], "a");
    }

    #[test]
    fn test_tool_result_count() {
        let req = ToolInvocationRequest::new("a", "b", "{}");
        let mut state = ConversationState::seeded("hi");
        state.push(Message::tool_response(vec![
            ToolInvocationResult::success(&req, "ok"),
            ToolInvocationResult::success(&req, "ok"),
        ]));
        assert_eq!(state.tool_result_count(), 2);
    }
}
