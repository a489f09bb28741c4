//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_schema / invoke）。注册时固化为
//! ToolSpecification + handler，之后不可修改；重名注册直接拒绝。
//! 注册阶段需要 &mut self，装配完成后包进 Arc 供执行器并发只读访问（无锁）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, ToolError};
use crate::tools::schema::empty_object_schema;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为已解析的 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool call 中的 function name）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn input_schema(&self) -> Value {
        empty_object_schema()
    }

    /// 执行工具。返回 Value::String 时原样作为结果文本，其余值序列化为 JSON 文本
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// 单个工具的不可变描述（发送给模型的能力列表条目）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpecification {
    fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        }
    }
}

/// 注册后的条目：规格 + 处理器
#[derive(Clone)]
pub struct RegisteredTool {
    pub spec: ToolSpecification,
    pub handler: Arc<dyn Tool>,
}

/// 把工具参数解析为具体类型；不匹配时为 InvalidArguments
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// 工具注册表：按插入顺序保存，按名称索引
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具已存在时返回 DuplicateTool，原注册保持不变
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let spec = ToolSpecification::from_tool(tool.as_ref());
        if spec.name.trim().is_empty() {
            return Err(AgentError::ConfigError("tool name must not be empty".to_string()));
        }
        if self.index.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }
        tracing::debug!(tool = %spec.name, "tool registered");
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            spec,
            handler: tool,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 全部工具规格，按注册顺序（保证发给模型的能力列表稳定可复现）
    pub fn specifications(&self) -> Vec<ToolSpecification> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.spec.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn invoke(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(Value::String(self.0.to_string()))
        }
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("fetch")).unwrap();
        let err = registry.register(NamedTool("fetch")).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "fetch"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(NamedTool("  ")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_specifications_keep_insertion_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(NamedTool(name)).unwrap();
        }
        let names: Vec<String> = registry
            .specifications()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.tool_names(), names);
    }

    #[test]
    fn test_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("a")).unwrap();
        let entry = registry.lookup("a").unwrap();
        assert_eq!(entry.spec.description, "test tool");
        assert_eq!(entry.spec.input_schema["type"], "object");
        assert!(registry.lookup("missing").is_none());
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_parse_args_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct A {
            url: String,
        }
        let err = parse_args::<A>(serde_json::json!({"url": 3})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
