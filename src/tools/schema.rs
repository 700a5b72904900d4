//! 能力调用 JSON Schema 生成（schemars）
//!
//! 将「合法 tool call」的 JSON 结构注入规划 prompt，减少 LLM 输出格式错误；
//! 同一结构也用于从 LLM 输出中反序列化结构化调用。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// 结构化能力调用：`{"tool": "...", "args": {...}}`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ToolCallFormat {
    /// 能力名，如 find_files_by_pattern、search_content、analyze_directory
    pub tool: String,
    /// 能力参数，依能力不同而不同（directory、pattern、file_path、command 等）
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

/// 返回能力调用的 JSON Schema 字符串，可拼入 prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_fields() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("\"tool\""));
        assert!(schema.contains("\"args\""));
    }
}
