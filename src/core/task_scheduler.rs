//! 工具工作池
//!
//! 用 Semaphore 限制同一批次内并发执行的工具数量；超出容量的调用排队等待许可。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 默认并发工具数
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 5;

/// 任务调度器：持有工具并发许可
#[derive(Clone)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let capacity = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 获取工具执行许可；信号量被关闭时返回 None
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.tool_semaphore.clone().acquire_owned().await.ok()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TOOLS)
    }
}
