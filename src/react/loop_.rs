//! 工具调用主循环
//!
//! AwaitingModelResponse -> (ToolCallsPending -> AwaitingModelResponse)* -> Terminated。
//! 每次进入 AwaitingModelResponse 轮次计数加一，超过 max_turns 即失败，因此模型最多被调用 max_turns 次。
//! 系统提示词由循环持有、每次请求时附加，不写入对话历史。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Instrument, Span};

use crate::core::AgentError;
use crate::llm::{LlmClient, ModelRequest, ModelResponse, OutputSchema, Usage};
use crate::memory::{ConversationState, Message, ToolInvocationRequest};
use crate::react::LoopEvent;
use crate::tools::ToolExecutor;

/// 默认最大轮次（模型调用次数上限）
pub const DEFAULT_MAX_TURNS: usize = 10;
/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 循环状态
#[derive(Debug)]
enum LoopState<T> {
    AwaitingModelResponse,
    ToolCallsPending(Vec<ToolInvocationRequest>),
    TerminatedSuccess(T),
    TerminatedFailure(AgentError),
}

/// 成功结束时的结果
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome<T> {
    pub payload: T,
    /// 模型调用次数
    pub turns: usize,
    /// 执行过的工具批次数
    pub tool_dispatches: usize,
    /// 本次运行的 token 用量
    pub usage: Usage,
    pub conversation: ConversationState,
}

/// 编排循环：持有模型客户端、工具执行器、提示词与结果 schema
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    system_prompt: Option<String>,
    output_schema: Option<OutputSchema>,
    max_turns: usize,
    event_tx: Option<UnboundedSender<LoopEvent>>,
    span: Option<Span>,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            llm,
            executor,
            system_prompt: None,
            output_schema: None,
            max_turns: DEFAULT_MAX_TURNS,
            event_tx: None,
            span: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// 至少 1 轮
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 指定本次运行的 tracing span（缺省新建 agent_loop span）
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// 以一条用户消息开始运行，直到得到可解析为 T 的最终结果或失败
    pub async fn run<T>(&self, user_message: impl Into<String>) -> Result<LoopOutcome<T>, AgentError>
    where
        T: DeserializeOwned + Send,
    {
        let span = self.span.clone().unwrap_or_else(|| {
            tracing::info_span!("agent_loop", max_turns = self.max_turns)
        });
        self.drive(ConversationState::seeded(user_message))
            .instrument(span)
            .await
    }

    async fn drive<T>(&self, mut conversation: ConversationState) -> Result<LoopOutcome<T>, AgentError>
    where
        T: DeserializeOwned + Send,
    {
        let tools = self.executor.specifications();
        let usage_before = self.llm.token_usage();
        let mut turns = 0usize;
        let mut tool_dispatches = 0usize;
        let mut state: LoopState<T> = LoopState::AwaitingModelResponse;

        loop {
            state = match state {
                LoopState::AwaitingModelResponse => {
                    turns += 1;
                    if turns > self.max_turns {
                        LoopState::TerminatedFailure(AgentError::IterationLimitExceeded {
                            max_turns: self.max_turns,
                        })
                    } else {
                        self.emit(LoopEvent::TurnStarted {
                            turn: turns,
                            max_turns: self.max_turns,
                        });
                        tracing::debug!(turn = turns, messages = conversation.len(), "calling model");
                        let request = ModelRequest {
                            system: self.system_prompt.as_deref(),
                            messages: conversation.messages(),
                            tools: &tools,
                            output_schema: self.output_schema.as_ref(),
                        };
                        let response = self.llm.complete(request).await;
                        match response {
                            Ok(response) => interpret(response, &mut conversation),
                            Err(e) => LoopState::TerminatedFailure(e.into()),
                        }
                    }
                }
                LoopState::ToolCallsPending(calls) => {
                    tool_dispatches += 1;
                    tracing::info!(turn = turns, count = calls.len(), "dispatching tool calls");
                    for call in &calls {
                        self.emit(LoopEvent::ToolCall {
                            call_id: call.call_id.clone(),
                            tool: call.tool_name.clone(),
                            arguments: call.raw_arguments.clone(),
                        });
                    }
                    let results = self.executor.execute_batch(calls).await;
                    for result in &results {
                        self.emit(LoopEvent::ToolResult {
                            call_id: result.call_id.clone(),
                            tool: result.tool_name.clone(),
                            success: result.success,
                            preview: result.content.chars().take(RESULT_PREVIEW_CHARS).collect(),
                        });
                    }
                    conversation.push(Message::tool_response(results));
                    LoopState::AwaitingModelResponse
                }
                LoopState::TerminatedSuccess(payload) => {
                    tracing::info!(turns, tool_dispatches, "loop finished");
                    self.emit(LoopEvent::Finished {
                        turns,
                        tool_dispatches,
                    });
                    return Ok(LoopOutcome {
                        payload,
                        turns,
                        tool_dispatches,
                        usage: self.llm.token_usage().since(&usage_before),
                        conversation,
                    });
                }
                LoopState::TerminatedFailure(error) => {
                    tracing::warn!(turns, tool_dispatches, error = %error, "loop failed");
                    self.emit(LoopEvent::Failed {
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            };
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// 解释一次模型响应并追加到历史：有工具调用则进入 ToolCallsPending，否则解析最终结果
fn interpret<T: DeserializeOwned>(
    response: ModelResponse,
    conversation: &mut ConversationState,
) -> LoopState<T> {
    let ModelResponse {
        content,
        tool_calls,
        ..
    } = response;

    if !tool_calls.is_empty() {
        conversation.push(Message::assistant_tool_calls(content, tool_calls.clone()));
        return LoopState::ToolCallsPending(tool_calls);
    }

    match content {
        Some(text) => match parse_final_payload::<T>(&text) {
            Ok(payload) => {
                conversation.push(Message::assistant(text));
                LoopState::TerminatedSuccess(payload)
            }
            Err(e) => LoopState::TerminatedFailure(e),
        },
        None => LoopState::TerminatedFailure(AgentError::NoFinalPayload),
    }
}

/// 解析最终 JSON；允许外层 ```json 代码块
pub fn parse_final_payload<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AgentError::MalformedFinalPayload(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;
    use crate::core::ToolError;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Tool, ToolRegistry};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echo the text argument"
        }

        async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args["text"].clone() }))
        }
    }

    fn executor() -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        Arc::new(ToolExecutor::new(registry).with_timeout(Some(Duration::from_secs(5))))
    }

    fn agent(llm: Arc<ScriptedLlmClient>) -> AgentLoop {
        AgentLoop::new(llm, executor()).with_system_prompt("You are a test agent.")
    }

    fn echo_call(id: &str, text: &str) -> ToolInvocationRequest {
        ToolInvocationRequest::new(id, "echo", json!({ "text": text }).to_string())
    }

    #[tokio::test]
    async fn test_immediate_final_payload() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ModelResponse::text(
            r#"{"answer": "42"}"#,
        )]));
        let outcome = agent(llm.clone()).run::<Answer>("question").await.unwrap();

        assert_eq!(outcome.payload.answer, "42");
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.tool_dispatches, 0);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(outcome.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_iteration_limit_after_exactly_max_turns() {
        let llm = Arc::new(ScriptedLlmClient::always_tool_calls("echo", r#"{"text":"again"}"#));
        let err = agent(llm.clone()).run::<Answer>("loop forever").await.unwrap_err();

        assert!(matches!(err, AgentError::IterationLimitExceeded { max_turns: 10 }));
        assert_eq!(llm.call_count(), 10);
    }

    #[tokio::test]
    async fn test_custom_turn_bound() {
        let llm = Arc::new(ScriptedLlmClient::always_tool_calls("echo", "{}"));
        let err = agent(llm.clone())
            .with_max_turns(3)
            .run::<Answer>("loop")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::IterationLimitExceeded { max_turns: 3 }));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_tool_round_trip_appends_history() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::with_tool_calls(vec![echo_call("a", "one"), echo_call("b", "two")]),
            ModelResponse::text(r#"{"answer": "done"}"#),
        ]));
        let outcome = agent(llm.clone()).run::<Answer>("use tools").await.unwrap();

        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.tool_dispatches, 1);
        assert_eq!(outcome.conversation.tool_result_count(), 2);

        // user, assistant(tool calls), tool response, assistant(final)
        let messages = outcome.conversation.messages();
        assert_eq!(messages.len(), 4);
        match &messages[2] {
            Message::ToolResponse { results } => {
                assert!(results[0].call_id.starts_with("a_"));
                assert!(results[1].call_id.starts_with("b_"));
                assert!(results[0].content.contains("one"));
                assert!(results.iter().all(|r| r.success));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // 第二次调用能看到工具结果；系统提示词不进入历史
        let recorded = llm.recorded();
        assert_eq!(recorded[1].messages.len(), 3);
        assert_eq!(recorded[1].system.as_deref(), Some("You are a test agent."));
        assert_eq!(recorded[1].tool_names, vec!["echo".to_string()]);
        assert!(recorded[1]
            .messages
            .iter()
            .all(|m| !matches!(m, Message::System { .. })));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::with_tool_calls(vec![ToolInvocationRequest::new("x", "missing", "{}")]),
            ModelResponse::text(r#"{"answer": "recovered"}"#),
        ]));
        let outcome = agent(llm).run::<Answer>("q").await.unwrap();
        match &outcome.conversation.messages()[2] {
            Message::ToolResponse { results } => {
                assert!(!results[0].success);
                assert!(results[0].content.contains("Unknown tool: missing"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(outcome.payload.answer, "recovered");
    }

    #[tokio::test]
    async fn test_malformed_payload_terminates_immediately() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::text("not json at all"),
            ModelResponse::text(r#"{"answer": "too late"}"#),
        ]));
        let err = agent(llm.clone()).run::<Answer>("q").await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedFinalPayload(_)));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_end_response() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ModelResponse::empty()]));
        let err = agent(llm).run::<Answer>("q").await.unwrap_err();
        assert!(matches!(err, AgentError::NoFinalPayload));
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let llm = Arc::new(ScriptedLlmClient::from_results(vec![Err("503".to_string())]));
        let err = agent(llm).run::<Answer>("q").await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(_)));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::with_tool_calls(vec![echo_call("a", "hi")]),
            ModelResponse::text(r#"{"answer": "ok"}"#),
        ]));
        agent(llm).with_events(tx).run::<Answer>("q").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], LoopEvent::TurnStarted { turn: 1, max_turns: 10 }));
        assert!(matches!(events[1], LoopEvent::ToolCall { .. }));
        assert!(matches!(events[2], LoopEvent::ToolResult { success: true, .. }));
        assert!(matches!(events[3], LoopEvent::TurnStarted { turn: 2, .. }));
        assert_eq!(
            events.last(),
            Some(&LoopEvent::Finished {
                turns: 2,
                tool_dispatches: 1
            })
        );
    }

    #[test]
    fn test_parse_fenced_payload() {
        let fenced = "```json\n{\"answer\": \"fenced\"}\n```";
        let parsed: Answer = parse_final_payload(fenced).unwrap();
        assert_eq!(parsed.answer, "fenced");

        let plain: Answer = parse_final_payload("  {\"answer\": \"plain\"} ").unwrap();
        assert_eq!(plain.answer, "plain");

        assert!(parse_final_payload::<Answer>("```\nnope\n```").is_err());
    }
}
