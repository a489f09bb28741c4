//! 工具执行器
//!
//! 一次接收模型在同一轮请求的全部工具调用：每个调用在独立的 tokio 任务上运行，
//! 并发数由每个批次各自新建的 TaskScheduler 限制（不同批次、不同请求之间互不占用许可）；可选的单次超时。
//! 批次 future 被丢弃时（如客户端断开），尚未完成的工具任务随之中止。
//! 未知工具、参数解析失败、处理器报错、超时、panic 都只影响该调用自身，转为 success=false 的结果。
//! 返回顺序与输入顺序一致（按槽位写回，而非完成顺序）；每次调用输出一条结构化审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::core::{TaskScheduler, ToolError, DEFAULT_MAX_CONCURRENT_TOOLS};
use crate::memory::{ToolInvocationRequest, ToolInvocationResult};
use crate::tools::{ToolRegistry, ToolSpecification};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具执行器：共享只读注册表 + 单批次并发上限 + 可选超时
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_concurrent_tools: usize,
    timeout: Option<Duration>,
}

/// 丢弃时中止批次内所有任务；已完成的任务中止无副作用
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self::with_shared_registry(Arc::new(registry))
    }

    pub fn with_shared_registry(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            timeout: None,
        }
    }

    /// 同一批次内最多并发执行的工具数（最小为 1）
    pub fn with_max_concurrency(mut self, max_concurrent_tools: usize) -> Self {
        self.max_concurrent_tools = max_concurrent_tools.max(1);
        self
    }

    /// 单次调用超时；None 表示不限时
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn specifications(&self) -> Vec<ToolSpecification> {
        self.registry.specifications()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrent_tools
    }

    /// 执行一批工具调用，返回与输入等长、同序的结果
    pub async fn execute_batch(
        &self,
        requests: Vec<ToolInvocationRequest>,
    ) -> Vec<ToolInvocationResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let scheduler = TaskScheduler::new(self.max_concurrent_tools);
        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let registry = Arc::clone(&self.registry);
                let scheduler = scheduler.clone();
                let timeout = self.timeout;
                tokio::spawn(
                    async move {
                        let Some(_permit) = scheduler.acquire_tool().await else {
                            return ToolInvocationResult::failure(
                                &request,
                                ToolError::Execution("tool worker pool closed".to_string()),
                            );
                        };
                        execute_one(&registry, &request, timeout).await
                    }
                    .in_current_span(),
                )
            })
            .collect();

        let _abort_guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        // handles[i] 对应 requests[i]：按槽位收集，panic 的任务在原位置补一条失败结果
        let joined = join_all(handles).await;
        let mut results = Vec::with_capacity(requests.len());
        for (request, outcome) in requests.iter().zip(joined) {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        tool = %request.tool_name,
                        call_id = %request.call_id,
                        error = %e,
                        "tool task aborted"
                    );
                    ToolInvocationResult::failure(
                        request,
                        ToolError::Panicked(request.tool_name.clone()),
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

/// 执行单个调用并记录审计日志
async fn execute_one(
    registry: &ToolRegistry,
    request: &ToolInvocationRequest,
    timeout: Option<Duration>,
) -> ToolInvocationResult {
    let start = Instant::now();
    let outcome = invoke(registry, request, timeout).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (ok, label) = match &outcome {
        Ok(_) => (true, "ok"),
        Err(e) => (false, e.outcome()),
    };
    tracing::info!(
        tool = %request.tool_name,
        call_id = %request.call_id,
        ok,
        outcome = label,
        duration_ms,
        args_preview = %args_preview(&request.raw_arguments),
        "tool"
    );

    match outcome {
        Ok(content) => ToolInvocationResult::success(request, content),
        Err(e) => ToolInvocationResult::failure(request, e),
    }
}

async fn invoke(
    registry: &ToolRegistry,
    request: &ToolInvocationRequest,
    timeout: Option<Duration>,
) -> Result<String, ToolError> {
    let entry = registry
        .lookup(&request.tool_name)
        .ok_or_else(|| ToolError::UnknownTool(request.tool_name.clone()))?;
    let args = parse_raw_arguments(&request.raw_arguments)?;

    let call = entry.handler.invoke(args);
    let value = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ToolError::Timeout {
                tool: request.tool_name.clone(),
                limit,
            })??,
        None => call.await?,
    };
    Ok(render_output(value))
}

/// 解析模型给出的参数文本；空串视为无参数
fn parse_raw_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(format!("{}: {}", e, raw)))
}

/// 字符串结果原样返回，其他值序列化为 JSON 文本
fn render_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", raw.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        raw.to_string()
    }
}
