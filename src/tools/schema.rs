//! JSON Schema 生成（schemars）
//!
//! 工具参数 schema 与最终结果 schema 都从 Rust 类型派生，避免手写的 schema 与实际反序列化结构漂移。
//! 子结构内联展开（不使用 $ref），部分模型端点不解析 definitions。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 为类型生成内联的 JSON Schema（去掉 $schema 元字段）
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    serde_json::to_value(root).unwrap_or_else(|_| empty_object_schema())
}

/// 无参数工具使用的 schema
pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}
