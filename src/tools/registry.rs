//! 能力注册表
//!
//! 所有能力实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找，
//! ActionExecutor 在调用时加超时、捕获 panic 并统一归一化为 ExecutionResult。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;

/// 能力 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
///
/// 返回值为带 `success` 的对象，或任意裸值（由分发层包装）。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 能力名称（注册表中的键）
    fn name(&self) -> &str;

    /// 能力描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 能力注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 已注册的能力名（排序后返回，保证提示与报错信息稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的 Available capabilities 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                self.tools
                    .get(&name)
                    .map(|tool| (name.clone(), tool.description().to_string()))
            })
            .collect()
    }

    /// 动态生成能力 schema JSON（与实际注册的能力一致）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("zeta"));
        registry.register(NamedTool("alpha"));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.tool_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_schema_json_lists_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("alpha"));
        let schema: Value = serde_json::from_str(&registry.to_schema_json()).unwrap();
        assert_eq!(schema[0]["name"], json!("alpha"));
        assert_eq!(schema[0]["parameters"]["type"], json!("object"));
    }
}
