//! 核心层：错误类型与工具工作池

pub mod error;
pub mod task_scheduler;

pub use error::{AgentError, ToolError};
pub use task_scheduler::{TaskScheduler, DEFAULT_MAX_CONCURRENT_TOOLS};
