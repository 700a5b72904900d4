//! 文件系统能力：filesystem_list / filesystem_read
//!
//! 通过 AgentApi.filesystem 访问；API 缺失返回 api_unavailable，路径逃逸上报为安全违规。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{FsError, ToolError};
use crate::tools::{FilesystemApi, Tool};

fn api_unavailable() -> Value {
    json!({
        "success": false,
        "detail": "Filesystem API is unavailable",
        "error": "api_unavailable",
    })
}

/// 将文件系统错误映射为结构化失败；路径逃逸以安全违规上抛
fn fs_failure(verb: &str, path: &str, err: FsError) -> Result<Value, ToolError> {
    match err {
        FsError::NotFound(_) => {
            tracing::info!(verb, path = %path, "Filesystem target not found");
            Ok(json!({
                "success": false,
                "detail": format!("Filesystem target not found: {path}"),
                "error": "file_not_found",
            }))
        }
        FsError::Io { source, .. } => {
            tracing::warn!(verb, path = %path, error = %source, "Filesystem operation failed");
            Ok(json!({
                "success": false,
                "detail": format!("Filesystem error for {path}: {source}"),
                "error": "filesystem_error",
            }))
        }
        escape @ FsError::PathEscape(_) => Err(escape.into()),
    }
}

fn list_with(fs: &dyn FilesystemApi, path: &str) -> Result<Value, ToolError> {
    match fs.list_directory(path) {
        Ok(listing) => Ok(json!({
            "success": true,
            "detail": format!("Listed {path}"),
            "data": listing,
            "type": "filesystem.list_directory",
        })),
        Err(e) => fs_failure("list", path, e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    ".".to_string()
}

/// 列出目录
pub struct FilesystemListTool {
    fs: Option<Arc<dyn FilesystemApi>>,
}

impl FilesystemListTool {
    pub fn new(fs: Option<Arc<dyn FilesystemApi>>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FilesystemListTool {
    fn name(&self) -> &str {
        "filesystem_list"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace. Args: {\"path\": \"directory, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path relative to the workspace"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ListArgs = serde_json::from_value(args)?;
        let Some(fs) = self.fs.as_deref() else {
            return Ok(api_unavailable());
        };
        list_with(fs, &args.path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    #[serde(default)]
    path: String,
}

/// 读取文件；目标为目录时改为列出目录
pub struct FilesystemReadTool {
    fs: Option<Arc<dyn FilesystemApi>>,
}

impl FilesystemReadTool {
    pub fn new(fs: Option<Arc<dyn FilesystemApi>>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for FilesystemReadTool {
    fn name(&self) -> &str {
        "filesystem_read"
    }

    fn description(&self) -> &str {
        "Read a file inside the workspace (directories are listed instead). Args: {\"path\": \"file path\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ReadArgs = serde_json::from_value(args)?;
        let Some(fs) = self.fs.as_deref() else {
            return Ok(api_unavailable());
        };
        let path = args.path.trim();
        if path.is_empty() {
            return Ok(json!({
                "success": false,
                "detail": "Path is required for read operation",
                "error": "missing_argument",
            }));
        }

        if fs.is_dir(path) {
            tracing::info!(path = %path, "Cannot read directory, using list instead");
            return list_with(fs, path);
        }

        match fs.read(path) {
            Ok(content) => Ok(json!({
                "success": true,
                "detail": format!("Read {path}"),
                "data": content,
                "type": "filesystem.read",
            })),
            Err(e) => fs_failure("read", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::LocalFilesystem;

    fn local(dir: &std::path::Path) -> Option<Arc<dyn FilesystemApi>> {
        Some(Arc::new(LocalFilesystem::new(dir)))
    }

    #[tokio::test]
    async fn test_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo").unwrap();

        let list = FilesystemListTool::new(local(dir.path()));
        let out = list.execute(json!({})).await.unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["data"], json!(["README.md", "pkg/"]));

        let read = FilesystemReadTool::new(local(dir.path()));
        let out = read.execute(json!({"path": "README.md"})).await.unwrap();
        assert_eq!(out["data"], json!("# demo"));
        assert_eq!(out["type"], json!("filesystem.read"));
    }

    #[tokio::test]
    async fn test_read_directory_falls_back_to_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/a.py"), "").unwrap();
        let read = FilesystemReadTool::new(local(dir.path()));
        let out = read.execute(json!({"path": "pkg"})).await.unwrap();
        assert_eq!(out["type"], json!("filesystem.list_directory"));
        assert_eq!(out["data"], json!(["a.py"]));
    }

    #[tokio::test]
    async fn test_failures_are_structured() {
        let dir = tempfile::tempdir().unwrap();
        let read = FilesystemReadTool::new(local(dir.path()));

        let out = read.execute(json!({"path": ""})).await.unwrap();
        assert_eq!(out["error"], json!("missing_argument"));

        let out = read.execute(json!({"path": "missing.txt"})).await.unwrap();
        assert_eq!(out["error"], json!("file_not_found"));
    }

    #[tokio::test]
    async fn test_escape_is_safety_violation() {
        let outer = tempfile::tempdir().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "s").unwrap();

        let read = FilesystemReadTool::new(local(&ws));
        let err = read
            .execute(json!({"path": "../secret.txt"}))
            .await
            .unwrap_err();
        match err {
            ToolError::SafetyViolation(v) => assert_eq!(v.rule, "path_escape"),
            other => panic!("expected safety violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_argument_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = FilesystemReadTool::new(local(dir.path()));
        let err = read.execute(json!({"file": "x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_missing_api() {
        let list = FilesystemListTool::new(None);
        let out = list.execute(json!({"path": "."})).await.unwrap();
        assert_eq!(out["error"], json!("api_unavailable"));
        assert_eq!(out["success"], json!(false));
    }
}
