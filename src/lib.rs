//! Scout - 产品网页结构化信息提取
//!
//! 模块划分：
//! - **agent**: 无头运行时（供 CLI / HTTP 调用）：带工具抽取与单次抽取
//! - **config**: 应用配置加载（TOML + 环境变量 + .env）
//! - **core**: 错误类型、工具并发调度
//! - **llm**: LLM 客户端抽象与实现（Azure / OpenAI 兼容 / Mock）
//! - **memory**: 单次执行内的对话历史
//! - **observability**: tracing 订阅器
//! - **react**: 工具调用主循环（状态机）与过程事件
//! - **schema**: 最终结果类型 ProductSnapshot
//! - **scraper**: 页面抓取与文本 / 链接提取
//! - **tools**: 工具 trait、注册表、并发执行器、fetch_page_text

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod schema;
pub mod scraper;
pub mod tools;
