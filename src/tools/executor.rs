//! 动作执行器
//!
//! 持有 ToolRegistry、CommandParser 与全局超时。两种入口：
//! - `execute_tool_call`：LLM 的结构化调用（name + JSON 参数串）
//! - `execute_step`：标记命令（`semantic:` / `composite:`）
//!
//! 无论处理器返回什么（对象、裸值、错误、超时、panic），结果都归一化为带 `success` 的
//! ExecutionResult，绝不向调用方抛错；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{
    AgentApi, AnalyzeDirectoryTool, CommandParser, ContentSearcher, ExecutionResult, FileFinder,
    FilesystemListTool, FilesystemReadTool, PythonAnalyzer, SafeFs, SearchCodebaseTool,
    ShellRunTool, ToolRegistry,
};

/// 结构化能力调用：名称 + 序列化的 JSON 参数对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 注册表内置能力的构造参数
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub tool_timeout_secs: u64,
    pub allowed_commands: Vec<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            allowed_commands: crate::tools::shell::default_allowed_commands(),
        }
    }
}

/// 动作执行器：对每次调用施加超时并捕获 panic，结果统一为 ExecutionResult
pub struct ActionExecutor {
    registry: ToolRegistry,
    parser: CommandParser,
    timeout: Duration,
}

impl ActionExecutor {
    /// 注册固定能力集；文件类能力绑定到 workspace，文件系统/Shell 能力通过 api 访问
    pub fn new(api: &AgentApi, workspace: impl AsRef<Path>, settings: ExecutorSettings) -> Self {
        let fs = SafeFs::new(workspace);
        let finder = FileFinder::new(fs.clone());

        let mut registry = ToolRegistry::new();
        registry.register(AnalyzeDirectoryTool::new(finder.clone()));
        registry.register(SearchCodebaseTool::new(finder.clone()));
        registry.register(finder);
        registry.register(ContentSearcher::new(fs.clone()));
        registry.register(PythonAnalyzer::new(fs.clone()));
        registry.register(FilesystemListTool::new(api.filesystem.clone()));
        registry.register(FilesystemReadTool::new(api.filesystem.clone()));
        registry.register(ShellRunTool::new(
            api.system.clone(),
            settings.allowed_commands,
            fs,
        ));
        tracing::info!(tools = ?registry.tool_names(), "ActionExecutor ready");

        Self::from_registry(registry, settings.tool_timeout_secs)
    }

    pub fn from_registry(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            parser: CommandParser::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行 LLM 的结构化调用；参数串非 JSON 对象时返回 argument_parsing_error
    pub async fn execute_tool_call(&self, call: &ToolInvocation) -> ExecutionResult {
        let raw = call.arguments.trim();
        let args = if raw.is_empty() {
            Ok(Map::new())
        } else {
            serde_json::from_str::<Map<String, Value>>(raw)
        };
        match args {
            Ok(args) => self.dispatch(&call.name, args).await,
            Err(e) => {
                tracing::error!(tool = %call.name, raw_args = %call.arguments, error = %e, "Failed to decode tool arguments JSON");
                ExecutionResult::failure(
                    "argument_parsing_error",
                    format!("Invalid arguments format from LLM: {e}"),
                )
            }
        }
    }

    /// 执行标记命令；解析失败返回 invalid_command
    pub async fn execute_step(&self, step: &str) -> ExecutionResult {
        match self.parser.parse(step) {
            Ok((tool_name, args)) => self.dispatch(&tool_name, args).await,
            Err(e) => {
                tracing::warn!(step = %step, error = %e, "Failed to parse command");
                ExecutionResult::failure("invalid_command", e.to_string())
            }
        }
    }

    /// 按名分发；超时、错误与 panic 均转为失败结果；输出 JSON 审计日志
    pub async fn dispatch(&self, tool_name: &str, args: Map<String, Value>) -> ExecutionResult {
        let Some(tool) = self.registry.get(tool_name) else {
            tracing::warn!(tool = %tool_name, "Unknown tool requested");
            let available: Vec<String> = self.registry.tool_names().into_iter().take(5).collect();
            return ExecutionResult::failure(
                "unknown_tool",
                format!(
                    "Unsupported tool: {tool_name}. Available tools: {}...",
                    available.join(", ")
                ),
            )
            .with_data(Value::Null);
        };

        let start = Instant::now();
        let args = Value::Object(args);
        let preview = args_preview(&args);
        tracing::debug!(tool = %tool_name, args = %preview, "Executing tool");

        let outcome = timeout(
            self.timeout,
            AssertUnwindSafe(tool.execute(args)).catch_unwind(),
        )
        .await;

        let result = match outcome {
            Ok(Ok(Ok(value))) => ExecutionResult::from_value(value),
            Ok(Ok(Err(err))) => tool_error_result(tool_name, err),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %tool_name, panic = %message, "Tool panicked");
                ExecutionResult::failure(
                    "tool_execution_error",
                    format!("Tool error in {tool_name}: panic: {message}"),
                )
                .with_data(Value::Null)
            }
            Err(_) => {
                tracing::warn!(tool = %tool_name, timeout_secs = self.timeout.as_secs(), "Tool timed out");
                ExecutionResult::failure(
                    "timeout",
                    format!(
                        "Tool {tool_name} timed out after {}s",
                        self.timeout.as_secs()
                    ),
                )
                .with_data(Value::Null)
            }
        };

        let audit = json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.success,
            "outcome": result.error.as_deref().unwrap_or(if result.success { "ok" } else { "failed" }),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }
}

/// 处理器错误 → 失败结果
fn tool_error_result(tool_name: &str, err: ToolError) -> ExecutionResult {
    match err {
        ToolError::SafetyViolation(violation) => {
            tracing::warn!(tool = %tool_name, rule = %violation.rule, error = %violation.message, "Safety violation during execution");
            ExecutionResult::failure(
                "safety_violation",
                format!("Safety violation: {}", violation.message),
            )
            .with_violation(json!(violation))
            .with_data(Value::Null)
        }
        ToolError::InvalidArguments(msg) => {
            tracing::error!(tool = %tool_name, error = %msg, "Tool argument error");
            ExecutionResult::failure(
                "invalid_arguments",
                format!("Invalid arguments for {tool_name}: {msg}"),
            )
            .with_data(Value::Null)
        }
        ToolError::Timeout(msg) => {
            tracing::warn!(tool = %tool_name, error = %msg, "Tool reported timeout");
            ExecutionResult::failure("timeout", format!("Tool {tool_name} timed out: {msg}"))
                .with_data(Value::Null)
        }
        ToolError::Failed { kind, message } => {
            tracing::error!(tool = %tool_name, kind = %kind, error = %message, "Tool execution failed");
            ExecutionResult::failure(
                "tool_execution_error",
                format!("Tool error in {tool_name}: {kind}: {message}"),
            )
            .with_data(Value::Null)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::tools::Tool;

    struct BareValueTool;

    #[async_trait]
    impl Tool for BareValueTool {
        fn name(&self) -> &str {
            "bare"
        }
        fn description(&self) -> &str {
            "returns a bare list"
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(json!([1, 2, 3]))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            panic!("handler exploded");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps past the timeout"
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "returns an error"
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::failed("ValueError", "bad input"))
        }
    }

    fn executor() -> ActionExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(BareValueTool);
        registry.register(PanicTool);
        registry.register(SlowTool);
        registry.register(FailingTool);
        ActionExecutor::from_registry(registry, 1)
    }

    #[tokio::test]
    async fn test_bare_value_is_wrapped() {
        let result = executor().dispatch("bare", Map::new()).await;
        assert!(result.success);
        assert_eq!(result.detail, "Operation completed");
        assert_eq!(result.data, Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available() {
        let result = executor()
            .execute_tool_call(&ToolInvocation::new("nope", "{}"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown_tool"));
        assert!(result.detail.contains("bare, boom, fail, slow"));
    }

    #[tokio::test]
    async fn test_bad_arguments_json() {
        let result = executor()
            .execute_tool_call(&ToolInvocation::new("bare", "{not json"))
            .await;
        assert_eq!(result.error.as_deref(), Some("argument_parsing_error"));

        let result = executor()
            .execute_tool_call(&ToolInvocation::new("bare", ""))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_panic_and_error_become_failures() {
        let ex = executor();
        let result = ex.dispatch("boom", Map::new()).await;
        assert_eq!(result.error.as_deref(), Some("tool_execution_error"));
        assert!(result.detail.contains("handler exploded"));

        let result = ex.dispatch("fail", Map::new()).await;
        assert_eq!(result.error.as_deref(), Some("tool_execution_error"));
        assert_eq!(result.detail, "Tool error in fail: ValueError: bad input");
    }

    #[tokio::test]
    async fn test_global_timeout() {
        let result = executor().dispatch("slow", Map::new()).await;
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_invalid_marker_command() {
        let result = executor().execute_step("shell:run").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("invalid_command"));
    }

    #[tokio::test]
    async fn test_builtin_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "class A:\n    pass\n").unwrap();
        let api = AgentApi::local(dir.path(), 5);
        let ex = ActionExecutor::new(&api, dir.path(), ExecutorSettings::default());
        assert_eq!(ex.tool_names().len(), 8);

        let result = ex
            .execute_step("composite:analyze_directory:dir=.:pattern=*.py")
            .await;
        assert!(result.success);
        assert_eq!(result.get("total_classes"), Some(json!(1)));

        let result = ex
            .execute_step("semantic:filesystem_read:path=../../etc/passwd")
            .await;
        assert!(!result.success);
    }
}
