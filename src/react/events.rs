//! 循环过程事件：用于 CLI / Web 展示轮次、工具调用与结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 即将调用模型（第几轮）
    TurnStarted { turn: usize, max_turns: usize },
    /// 模型请求的一次工具调用
    ToolCall {
        call_id: String,
        tool: String,
        arguments: String,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        call_id: String,
        tool: String,
        success: bool,
        preview: String,
    },
    /// 得到最终结果
    Finished { turns: usize, tool_dispatches: usize },
    /// 终止于失败
    Failed { error: String },
}
