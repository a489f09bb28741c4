//! OpenAI 兼容 / Azure OpenAI 客户端
//!
//! 通过 async_openai 调用 Chat Completions：对话历史、工具定义（function tools）、
//! 结构化输出（response_format = json_schema）一并发送；返回的 tool_calls 转为 ToolInvocationRequest。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::{AzureConfig, OpenAIConfig};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall, FunctionObject,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, OutputSchema, Usage};
use crate::memory::{Message, ToolInvocationRequest};
use crate::tools::ToolSpecification;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

enum Backend {
    Azure(Client<AzureConfig>),
    OpenAi(Client<OpenAIConfig>),
}

/// Chat Completions 客户端：Azure 部署或 OpenAI 兼容端点
pub struct OpenAiClient {
    backend: Backend,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// OpenAI 兼容端点；api_key 缺省时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            backend: Backend::OpenAi(Client::with_config(config)),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    /// Azure OpenAI 部署；model 字段记录部署名
    pub fn azure(endpoint: &str, api_key: &str, deployment: &str, api_version: &str) -> Self {
        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_version(api_version)
            .with_deployment_id(deployment)
            .with_api_key(api_key);

        Self {
            backend: Backend::Azure(Client::with_config(config)),
            model: deployment.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        request: &ModelRequest<'_>,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = to_openai_messages(request.system, request.messages)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if !request.tools.is_empty() {
            args.tools(to_openai_tools(request.tools));
        }
        if let Some(schema) = request.output_schema {
            args.response_format(to_response_format(schema));
        }
        args.build()
    }

    async fn send(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, OpenAIError> {
        match &self.backend {
            Backend::Azure(client) => client.chat().create(request).await,
            Backend::OpenAi(client) => client.chat().create(request).await,
        }
    }
}

/// 对话历史转为 API 消息；一条 ToolResponse 展开为多条 tool 消息（按结果顺序）
pub fn to_openai_messages(
    system: Option<&str>,
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?,
        ));
    }
    for message in messages {
        match message {
            Message::System { content } => out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(content.as_str())
                    .build()?,
            )),
            Message::User { content } => out.push(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content.as_str())
                    .build()?,
            )),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(content) = content {
                    args.content(content.as_str());
                }
                if !tool_calls.is_empty() {
                    args.tool_calls(
                        tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.call_id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.tool_name.clone(),
                                    arguments: call.raw_arguments.clone(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                out.push(ChatCompletionRequestMessage::Assistant(args.build()?));
            }
            Message::ToolResponse { results } => {
                for result in results {
                    out.push(ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(result.call_id.as_str())
                            .content(result.content.as_str())
                            .build()?,
                    ));
                }
            }
        }
    }
    Ok(out)
}

pub fn to_openai_tools(specs: &[ToolSpecification]) -> Vec<ChatCompletionTool> {
    specs
        .iter()
        .map(|spec| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: spec.name.clone(),
                description: Some(spec.description.clone()),
                parameters: Some(spec.input_schema.clone()),
                strict: None,
            },
        })
        .collect()
}

pub fn to_response_format(schema: &OutputSchema) -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: schema.description.clone(),
            name: schema.name.clone(),
            schema: Some(schema.schema.clone()),
            strict: Some(schema.strict),
        },
    }
}

/// 取首个 choice：tool_calls 转为调用请求，空白 content 视为无内容
fn from_openai_response(response: CreateChatCompletionResponse) -> Result<ModelResponse, LlmError> {
    let usage = response
        .usage
        .as_ref()
        .map(|u| Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64));
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;
    let message = choice.message;

    let tool_calls: Vec<ToolInvocationRequest> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            ToolInvocationRequest::new(call.id, call.function.name, call.function.arguments)
        })
        .collect();
    let content = message.content.filter(|c| !c.trim().is_empty());

    if tool_calls.is_empty() && content.is_none() {
        if let Some(refusal) = message.refusal {
            return Err(LlmError::Refusal(refusal));
        }
    }

    Ok(ModelResponse {
        content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> Usage {
        self.usage.get()
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        let api_request = self
            .build_request(&request)
            .map_err(|e| LlmError::ApiError(e.to_string()))?;
        let response = self
            .send(api_request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;
        let parsed = from_openai_response(response)?;
        if let Some(usage) = parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        tracing::debug!(
            model = %self.model,
            tool_calls = parsed.tool_calls.len(),
            has_content = parsed.content.is_some(),
            "chat completion received"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::{ConversationState, ToolInvocationResult};

    fn conversation() -> ConversationState {
        let first = ToolInvocationRequest::new("call_1", "fetch_page_text", r#"{"url":"https://a.test"}"#);
        let second = ToolInvocationRequest::new("call_2", "fetch_page_text", r#"{"url":"https://b.test"}"#);
        let mut state = ConversationState::seeded("Analyze https://a.test");
        state.push(Message::assistant_tool_calls(
            None,
            vec![first.clone(), second.clone()],
        ));
        state.push(Message::tool_response(vec![
            ToolInvocationResult::success(&first, "page a"),
            ToolInvocationResult::failure(&second, "Failed to fetch URL: timeout"),
        ]));
        state
    }

    #[test]
    fn test_tool_response_expands_per_call() {
        let state = conversation();
        let messages = to_openai_messages(Some("system prompt"), state.messages()).unwrap();
        assert_eq!(messages.len(), 5);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        match &messages[2] {
            ChatCompletionRequestMessage::Assistant(msg) => {
                let calls = msg.tool_calls.as_ref().unwrap();
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[1].function.arguments, r#"{"url":"https://b.test"}"#);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match (&messages[3], &messages[4]) {
            (ChatCompletionRequestMessage::Tool(a), ChatCompletionRequestMessage::Tool(b)) => {
                assert_eq!(a.tool_call_id, "call_1");
                assert_eq!(b.tool_call_id, "call_2");
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[test]
    fn test_without_system_prompt() {
        let state = ConversationState::seeded("hello");
        let messages = to_openai_messages(None, state.messages()).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_tools_and_response_format() {
        let specs = vec![ToolSpecification {
            name: "fetch_page_text".to_string(),
            description: "Fetch a page".to_string(),
            input_schema: json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        }];
        let tools = to_openai_tools(&specs);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "fetch_page_text");
        assert_eq!(
            tools[0].function.parameters.as_ref().unwrap()["properties"]["url"]["type"],
            "string"
        );

        let schema = OutputSchema {
            name: "ProductSnapshot".to_string(),
            description: None,
            schema: json!({"type": "object"}),
            strict: true,
        };
        match to_response_format(&schema) {
            ResponseFormat::JsonSchema { json_schema } => {
                assert_eq!(json_schema.name, "ProductSnapshot");
                assert_eq!(json_schema.strict, Some(true));
            }
            other => panic!("unexpected format: {other:?}"),
        }
    }

    #[test]
    fn test_build_request_omits_empty_tools() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "gpt-4o-mini", Some("sk-test"));
        let state = ConversationState::seeded("hello");
        let request = ModelRequest {
            system: Some("sys"),
            messages: state.messages(),
            tools: &[],
            output_schema: None,
        };
        let built = client.build_request(&request).unwrap();
        assert!(built.tools.is_none());
        assert!(built.response_format.is_none());
        assert_eq!(built.messages.len(), 2);
    }

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::new();
        usage.add(10, 5);
        usage.add(1, 1);
        assert_eq!(usage.get(), Usage::new(11, 6));
    }
}
