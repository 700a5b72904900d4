//! 执行结果：分发层唯一的失败传递通道
//!
//! 处理器返回的 JSON 对象经 `ExecutionResult::from_value` 归一化：缺失的 `success` 补为 true，
//! 非对象结果包成 `{success: true, data, detail: "Operation completed"}`。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 一次能力调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// 错误类型标签，如 unknown_tool、invalid_command、timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<Value>,
    /// 处理器附带的其它顶层字段（files_found、total_classes 等）
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            data: None,
            error: None,
            violation: None,
            extra: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            data: None,
            error: Some(error.into()),
            violation: None,
            extra: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_violation(mut self, violation: Value) -> Self {
        self.violation = Some(violation);
        self
    }

    /// 将处理器的原始返回值归一化
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let success = match map.remove("success") {
                    Some(Value::Bool(b)) => b,
                    Some(Value::Null) | None => true,
                    Some(other) => is_truthy(&other),
                };
                let detail = match map.remove("detail") {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                let data = map.remove("data");
                let error = match map.remove("error") {
                    Some(Value::String(s)) => Some(s),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                };
                let violation = map.remove("violation").filter(|v| !v.is_null());
                Self {
                    success,
                    detail,
                    data,
                    error,
                    violation,
                    extra: map,
                }
            }
            other => Self::ok("Operation completed").with_data(other),
        }
    }

    /// 按名称读取字段（包含 success/detail/data/error 与附加字段）
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "success" => Some(Value::Bool(self.success)),
            "detail" => Some(Value::String(self.detail.clone())),
            "data" => self.data.clone(),
            "error" => self.error.clone().map(Value::String),
            "violation" => self.violation.clone(),
            _ => self.extra.get(key).cloned(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_success_defaults_to_true() {
        let r = ExecutionResult::from_value(json!({"detail": "done", "count": 3}));
        assert!(r.success);
        assert_eq!(r.detail, "done");
        assert_eq!(r.get("count"), Some(json!(3)));
    }

    #[test]
    fn test_bare_value_is_wrapped() {
        let r = ExecutionResult::from_value(json!(["a.py", "b.py"]));
        assert!(r.success);
        assert_eq!(r.detail, "Operation completed");
        assert_eq!(r.data, Some(json!(["a.py", "b.py"])));
    }

    #[test]
    fn test_explicit_failure_kept() {
        let r = ExecutionResult::from_value(json!({
            "success": false,
            "detail": "nope",
            "error": "file_not_found"
        }));
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("file_not_found"));
    }

    #[test]
    fn test_serialization_flattens_extra_fields() {
        let r = ExecutionResult::from_value(json!({"files_found": 2}));
        let v = r.to_value();
        assert_eq!(v["success"], json!(true));
        assert_eq!(v["files_found"], json!(2));
        assert!(v.get("error").is_none());
    }
}
