//! 文件查找：find_files_by_pattern
//!
//! 在工作区内递归遍历（walkdir），按文件名 glob 匹配；默认跳过 .git、venv、node_modules 等目录。
//! 返回工作区相对路径，按字典序排列。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::core::{FsError, ToolError};
use crate::tools::{SafeFs, Tool};

/// 遍历时跳过的目录
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    "venv",
    ".venv",
    "env",
    ".env",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "node_modules",
    ".tox",
    "dist",
    "build",
    "*.egg-info",
];

pub(crate) fn compile_patterns(raw: &[&str]) -> Vec<Pattern> {
    raw.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

pub(crate) fn is_ignored(entry: &DirEntry, ignore: &[Pattern]) -> bool {
    let name = entry.file_name().to_string_lossy();
    ignore.iter().any(|p| p.matches(&name))
}

/// 遍历 root 下所有条目（不含 root 本身）；忽略的目录整棵剪掉，不可读条目跳过
pub(crate) fn walk<'a>(
    root: &Path,
    ignore: &'a [Pattern],
) -> impl Iterator<Item = DirEntry> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored(e, ignore)))
        .filter_map(|e| e.ok())
        .filter(|e| e.depth() > 0)
}

#[derive(Error, Debug)]
pub enum FindError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Invalid name pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// 文件查找器；组合能力（analyze_directory / search_codebase）复用 find
#[derive(Debug, Clone)]
pub struct FileFinder {
    fs: SafeFs,
    ignore: Vec<Pattern>,
}

impl FileFinder {
    pub fn new(fs: SafeFs) -> Self {
        Self {
            fs,
            ignore: compile_patterns(DEFAULT_IGNORE_DIRS),
        }
    }

    pub fn workspace(&self) -> &SafeFs {
        &self.fs
    }

    /// 查找匹配 name_pattern 的文件；file_type 为 "d" 时查找目录
    pub fn find(
        &self,
        directory: &str,
        name_pattern: &str,
        file_type: Option<&str>,
    ) -> Result<Vec<PathBuf>, FindError> {
        let base = match self.fs.resolve(directory) {
            Ok(p) => p,
            Err(FsError::NotFound(_)) => {
                return Err(FindError::DirectoryNotFound(directory.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let pattern = Pattern::new(name_pattern).map_err(|e| FindError::InvalidPattern {
            pattern: name_pattern.to_string(),
            reason: e.to_string(),
        })?;
        let want_dirs = file_type == Some("d");

        let mut found: Vec<PathBuf> = walk(&base, &self.ignore)
            .filter(|e| e.file_type().is_dir() == want_dirs)
            .filter(|e| pattern.matches(&e.file_name().to_string_lossy()))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        tracing::debug!(directory, name_pattern, count = found.len(), "find_files");
        Ok(found)
    }

    pub fn display(&self, paths: &[PathBuf]) -> Vec<String> {
        paths.iter().map(|p| self.fs.display(p)).collect()
    }
}

/// 将查找错误映射为结构化失败；路径逃逸以安全违规上抛
pub(crate) fn find_failure(err: FindError) -> Result<Value, ToolError> {
    match err {
        FindError::DirectoryNotFound(_) => Ok(json!({
            "success": false,
            "detail": err.to_string(),
            "files": [],
            "data": [],
        })),
        FindError::InvalidPattern { .. } => Ok(json!({
            "success": false,
            "detail": err.to_string(),
            "error": "invalid_pattern",
            "files": [],
            "data": [],
        })),
        FindError::Fs(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FindArgs {
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default = "default_name_pattern")]
    name_pattern: String,
    #[serde(default)]
    file_type: Option<String>,
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_name_pattern() -> String {
    "*".to_string()
}

#[async_trait]
impl Tool for FileFinder {
    fn name(&self) -> &str {
        "find_files_by_pattern"
    }

    fn description(&self) -> &str {
        "Find files by name pattern. Args: {\"directory\": \".\", \"name_pattern\": \"*.py\", \"file_type\": \"f or d\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string", "description": "Directory to search, default '.'"},
                "name_pattern": {"type": "string", "description": "Filename glob, e.g. test_*.py"},
                "file_type": {"type": "string", "enum": ["f", "d"]}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FindArgs = serde_json::from_value(args)?;
        let found = match self.find(&args.directory, &args.name_pattern, args.file_type.as_deref()) {
            Ok(found) => found,
            Err(e) => return find_failure(e),
        };
        let files = self.display(&found);
        Ok(json!({
            "success": true,
            "detail": format!("Found {} file(s)", files.len()),
            "count": files.len(),
            "data": files,
            "files": files,
        }))
    }
}
