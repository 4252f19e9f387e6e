//! 工具参数 JSON Schema 生成（schemars）
//!
//! 参数结构体派生 JsonSchema，这里压平成模型熟悉的 {type, properties, required} 形式。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 生成参数结构体 T 的 schema，去掉 $schema / title / definitions 等模型无关字段
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let root = schema_for!(T);
    let full = serde_json::to_value(&root).unwrap_or(Value::Null);
    json!({
        "type": "object",
        "properties": full.get("properties").cloned().unwrap_or_else(|| json!({})),
        "required": full.get("required").cloned().unwrap_or_else(|| json!([])),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// 查询语句
        query: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_parameters_schema_flattened() {
        let schema = parameters_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["query"].is_object());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "query");
        assert!(schema.get("$schema").is_none());
    }
}
