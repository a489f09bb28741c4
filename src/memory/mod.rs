//! 记忆层：单次执行内的对话历史

pub mod conversation;

pub use conversation::{ConversationState, Message, ToolInvocationRequest, ToolInvocationResult};
