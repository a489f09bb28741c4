//! 认知层：工具调用主循环与过程事件

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{parse_final_payload, AgentLoop, LoopOutcome, DEFAULT_MAX_TURNS};
