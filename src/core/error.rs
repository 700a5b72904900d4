//! 错误类型
//!
//! - `AgentError`：运行级错误（目标校验、LLM、配置），仅目标校验会从 `run` 返回给调用方
//! - `ToolError`：能力处理器内部错误，由 ActionExecutor 统一转为失败的 ExecutionResult，绝不跨越分发边界
//! - `FsError`：工作区沙箱文件访问错误

use serde::Serialize;
use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 目标为空、含禁用关键词等，发生在任何副作用之前
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 安全策略违规的描述（写入 ExecutionResult 的 `violation` 字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// 触发的规则名，如 path_escape、forbidden_pattern、command_not_allowed
    pub rule: String,
    pub message: String,
}

impl Violation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// 能力处理器错误；ActionExecutor 按变体映射为不同的 error 标签
#[derive(Error, Debug)]
pub enum ToolError {
    /// 安全策略违规：上报但不终止运行
    #[error("Safety violation: {}", .0.message)]
    SafetyViolation(Violation),

    /// 参数形状不符（缺字段、多余字段、类型错误）
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// 其它内部错误；kind 为错误类型名
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },
}

impl ToolError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidArguments(e.to_string())
    }
}

/// 沙箱文件系统错误
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<FsError> for ToolError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::PathEscape(path) => ToolError::SafetyViolation(Violation::new(
                "path_escape",
                format!("path '{path}' is outside the workspace"),
            )),
            FsError::NotFound(path) => ToolError::failed("FileNotFoundError", path),
            FsError::Io { path, source } => {
                ToolError::failed("OSError", format!("{path}: {source}"))
            }
        }
    }
}
