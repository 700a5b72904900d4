//! 组合能力：analyze_directory / search_codebase
//!
//! 一次调用在内部循环完成"查找文件 → 逐个分析/搜索"，只把汇总结果交回上下文，
//! 避免 LLM 为每个文件单独发起一轮调用。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::analysis::parse_python;
use crate::tools::finder::{FileFinder, FindError};
use crate::tools::search::{compile_search_pattern, matching_lines};
use crate::tools::workspace::read_lossy;
use crate::tools::Tool;

/// 查找阶段失败：目录不存在/模式非法为结构化失败，路径逃逸上抛
fn composite_failure(err: FindError) -> Result<Value, ToolError> {
    match err {
        FindError::Fs(e) => Err(e.into()),
        FindError::InvalidPattern { .. } => Ok(json!({
            "success": false,
            "detail": err.to_string(),
            "error": "invalid_pattern",
            "data": null,
        })),
        FindError::DirectoryNotFound(_) => Ok(json!({
            "success": false,
            "detail": err.to_string(),
            "data": null,
        })),
    }
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_file_type() -> String {
    "f".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyzeDirectoryArgs {
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default = "default_py_pattern")]
    pattern: String,
    #[serde(default = "default_file_type")]
    file_type: String,
}

fn default_py_pattern() -> String {
    "*.py".to_string()
}

/// analyze_directory：统计目录下匹配文件的类/函数/导入总数
pub struct AnalyzeDirectoryTool {
    finder: FileFinder,
}

impl AnalyzeDirectoryTool {
    pub fn new(finder: FileFinder) -> Self {
        Self { finder }
    }
}

#[async_trait]
impl Tool for AnalyzeDirectoryTool {
    fn name(&self) -> &str {
        "analyze_directory"
    }

    fn description(&self) -> &str {
        "Analyze every matching file in a directory and return totals. Args: {\"directory\": \".\", \"pattern\": \"*.py\", \"file_type\": \"f\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string"},
                "pattern": {"type": "string", "description": "Filename glob, default *.py"},
                "file_type": {"type": "string", "enum": ["f", "d"]}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: AnalyzeDirectoryArgs = serde_json::from_value(args)?;
        let files = match self
            .finder
            .find(&args.directory, &args.pattern, Some(&args.file_type))
        {
            Ok(files) => files,
            Err(e) => return composite_failure(e),
        };

        let (mut total_classes, mut total_functions, mut total_imports) = (0usize, 0usize, 0usize);
        let mut files_analyzed = 0usize;
        let mut errors: Vec<String> = Vec::new();
        for path in &files {
            match read_lossy(path) {
                Ok(source) => {
                    // 语法错误的文件计为已分析，但不贡献任何定义
                    match parse_python(&source) {
                        Ok(module) => {
                            total_classes += module.classes.len();
                            total_functions += module.functions.len();
                            total_imports += module.imports.len();
                        }
                        Err(e) => tracing::debug!(
                            file = %self.finder.workspace().display(path),
                            error = %e,
                            "Skipping definitions of file with syntax errors"
                        ),
                    }
                    files_analyzed += 1;
                }
                Err(e) => errors.push(format!("{}: {e}", self.finder.workspace().display(path))),
            }
        }
        tracing::info!(
            directory = %args.directory,
            files = files.len(),
            files_analyzed,
            errors = errors.len(),
            "analyze_directory done"
        );

        Ok(json!({
            "success": true,
            "directory": args.directory,
            "pattern": args.pattern,
            "files_found": files.len(),
            "files_analyzed": files_analyzed,
            "total_classes": total_classes,
            "total_functions": total_functions,
            "total_imports": total_imports,
            "errors": errors,
            "detail": format!(
                "Analyzed {files_analyzed}/{} files: {total_classes} classes, {total_functions} functions, {total_imports} imports",
                files.len()
            ),
            "data": {
                "total_classes": total_classes,
                "total_functions": total_functions,
                "total_imports": total_imports,
                "files_analyzed": files_analyzed,
            },
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchCodebaseArgs {
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default = "default_any_pattern")]
    pattern: String,
    #[serde(default)]
    content_pattern: Option<String>,
    #[serde(default = "default_file_type")]
    file_type: String,
}

fn default_any_pattern() -> String {
    "*".to_string()
}

/// search_codebase：按文件名查找，可选再按内容过滤
pub struct SearchCodebaseTool {
    finder: FileFinder,
}

impl SearchCodebaseTool {
    pub fn new(finder: FileFinder) -> Self {
        Self { finder }
    }
}

#[async_trait]
impl Tool for SearchCodebaseTool {
    fn name(&self) -> &str {
        "search_codebase"
    }

    fn description(&self) -> &str {
        "Find files by name, optionally keeping only files whose content matches a regex. Args: {\"directory\": \".\", \"pattern\": \"*\", \"content_pattern\": \"optional regex\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string"},
                "pattern": {"type": "string"},
                "content_pattern": {"type": "string"},
                "file_type": {"type": "string", "enum": ["f", "d"]}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchCodebaseArgs = serde_json::from_value(args)?;
        let files = match self
            .finder
            .find(&args.directory, &args.pattern, Some(&args.file_type))
        {
            Ok(files) => files,
            Err(e) => return composite_failure(e),
        };
        let shown = self.finder.display(&files);

        let Some(content_pattern) = args.content_pattern.filter(|p| !p.is_empty()) else {
            return Ok(json!({
                "success": true,
                "files_found": shown.len(),
                "files": shown,
                "data": {
                    "files_found": shown.len(),
                    "files": &shown[..shown.len().min(100)],
                },
                "detail": format!("Found {} file(s)", shown.len()),
            }));
        };

        let re = match compile_search_pattern(&content_pattern, true, false) {
            Ok(re) => re,
            Err(e) => {
                return Ok(json!({
                    "success": false,
                    "detail": format!("Invalid content pattern '{content_pattern}': {e}"),
                    "error": "invalid_pattern",
                    "data": null,
                }))
            }
        };

        let matching: Vec<Value> = files
            .iter()
            .zip(&shown)
            .filter_map(|(path, name)| {
                let count = matching_lines(&re, path).len();
                (count > 0).then(|| json!({"file": name, "matches": count}))
            })
            .collect();

        Ok(json!({
            "success": true,
            "files_found": shown.len(),
            "files_matching_content": matching.len(),
            "matching_files": matching,
            "data": {
                "files_found": shown.len(),
                "files_matching_content": matching.len(),
                "matching_files": &matching[..matching.len().min(50)],
            },
            "detail": format!("Found {}/{} file(s) matching content", matching.len(), shown.len()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SafeFs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::write(
            root.join("pkg/models.py"),
            "import os\n\nclass A:\n    def run(self):\n        pass\n\nclass B:\n    pass\n",
        )
        .unwrap();
        std::fs::write(
            root.join("pkg/util.py"),
            "from typing import Any\n\ndef helper():\n    return 1\n",
        )
        .unwrap();
        std::fs::write(root.join("README.md"), "# helper docs\n").unwrap();
        dir
    }

    fn finder(dir: &tempfile::TempDir) -> FileFinder {
        FileFinder::new(SafeFs::new(dir.path()))
    }

    #[tokio::test]
    async fn test_analyze_directory_totals() {
        let dir = fixture();
        let tool = AnalyzeDirectoryTool::new(finder(&dir));
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["files_found"], json!(2));
        assert_eq!(out["files_analyzed"], json!(2));
        assert_eq!(out["total_classes"], json!(2));
        assert_eq!(out["total_functions"], json!(2));
        assert_eq!(out["total_imports"], json!(2));
        assert_eq!(
            out["detail"],
            json!("Analyzed 2/2 files: 2 classes, 2 functions, 2 imports")
        );
        assert_eq!(out["data"]["total_classes"], json!(2));
    }

    #[tokio::test]
    async fn test_analyze_directory_ignores_broken_files() {
        let dir = fixture();
        std::fs::write(
            dir.path().join("pkg/broken.py"),
            "import sys\n\nclass Half:\n    def go(self:\n        pass\n",
        )
        .unwrap();
        let tool = AnalyzeDirectoryTool::new(finder(&dir));
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out["files_found"], json!(3));
        assert_eq!(out["files_analyzed"], json!(3));
        assert_eq!(out["total_classes"], json!(2));
        assert_eq!(out["total_functions"], json!(2));
        assert_eq!(out["total_imports"], json!(2));
        assert_eq!(out["errors"], json!([]));
    }

    #[tokio::test]
    async fn test_analyze_missing_directory() {
        let dir = fixture();
        let tool = AnalyzeDirectoryTool::new(finder(&dir));
        let out = tool.execute(json!({"directory": "nope"})).await.unwrap();
        assert_eq!(out["success"], json!(false));
        assert!(out["data"].is_null());
    }

    #[tokio::test]
    async fn test_search_codebase_files_only() {
        let dir = fixture();
        let tool = SearchCodebaseTool::new(finder(&dir));
        let out = tool.execute(json!({"pattern": "*.py"})).await.unwrap();
        assert_eq!(out["files"], json!(["pkg/models.py", "pkg/util.py"]));
        assert_eq!(out["data"]["files_found"], json!(2));
    }

    #[tokio::test]
    async fn test_search_codebase_by_content() {
        let dir = fixture();
        let tool = SearchCodebaseTool::new(finder(&dir));
        let out = tool
            .execute(json!({"content_pattern": "HELPER"}))
            .await
            .unwrap();
        assert_eq!(
            out["matching_files"],
            json!([
                {"file": "README.md", "matches": 1},
                {"file": "pkg/util.py", "matches": 1}
            ])
        );
        assert_eq!(out["detail"], json!("Found 2/3 file(s) matching content"));
    }
}
