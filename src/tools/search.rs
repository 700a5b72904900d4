//! 内容搜索：search_content
//!
//! 按行匹配（regex 或字面量，默认不区分大小写），结果格式 `path:line:text`。
//! `directory` 实际是文件时只搜索该文件；目录遍历额外跳过 .coverage 与 *.pyc。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{FsError, ToolError};
use crate::tools::finder::{compile_patterns, is_ignored, walk, DEFAULT_IGNORE_DIRS};
use crate::tools::workspace::read_lossy;
use crate::tools::{SafeFs, Tool};

const EXTRA_IGNORE: &[&str] = &[".coverage", "*.pyc"];

/// 编译搜索模式；literal 模式先转义
pub fn compile_search_pattern(
    pattern: &str,
    regex: bool,
    case_sensitive: bool,
) -> Result<Regex, regex::Error> {
    let source = if regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
}

/// 文件中匹配的 (行号, 行内容)；不可读的文件视为无匹配
pub fn matching_lines(re: &Regex, path: &Path) -> Vec<(usize, String)> {
    let Ok(content) = read_lossy(path) else {
        return Vec::new();
    };
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .map(|(i, line)| (i + 1, line.trim_end().to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default = "default_true")]
    regex: bool,
    #[serde(default)]
    case_sensitive: bool,
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

/// 内容搜索器
#[derive(Debug, Clone)]
pub struct ContentSearcher {
    fs: SafeFs,
    ignore: Vec<Pattern>,
}

impl ContentSearcher {
    pub fn new(fs: SafeFs) -> Self {
        let mut raw: Vec<&str> = DEFAULT_IGNORE_DIRS.to_vec();
        raw.extend_from_slice(EXTRA_IGNORE);
        Self {
            fs,
            ignore: compile_patterns(&raw),
        }
    }

    /// 待搜索文件：显式列表中存在的文件，否则遍历目录
    fn collect_files(
        &self,
        files: Option<&[String]>,
        directory: &str,
    ) -> Result<Vec<PathBuf>, FsError> {
        if let Some(files) = files.filter(|f| !f.is_empty()) {
            let mut out = Vec::new();
            for f in files {
                match self.fs.resolve(f) {
                    Ok(p) if p.is_file() => out.push(p),
                    Ok(_) | Err(FsError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(out);
        }

        let base = match self.fs.resolve(directory) {
            Ok(p) => p,
            Err(FsError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(walk(&base, &self.ignore)
            .filter(|e| e.file_type().is_file() && !is_ignored(e, &self.ignore))
            .map(|e| e.into_path())
            .collect())
    }

    pub fn search(
        &self,
        re: &Regex,
        files: Option<&[String]>,
        directory: &str,
    ) -> Result<Vec<String>, FsError> {
        let targets = self.collect_files(files, directory)?;
        let mut matches = Vec::new();
        for path in &targets {
            let shown = self.fs.display(path);
            for (line_no, line) in matching_lines(re, path) {
                matches.push(format!("{shown}:{line_no}:{line}"));
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl Tool for ContentSearcher {
    fn name(&self) -> &str {
        "search_content"
    }

    fn description(&self) -> &str {
        "Search file contents line by line. Args: {\"pattern\": \"regex or text\", \"directory\": \".\", \"files\": [\"optional file list\"], \"regex\": true, \"case_sensitive\": false}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regex (or literal text when regex=false)"},
                "directory": {"type": "string", "description": "Directory or single file to search"},
                "files": {"type": "array", "items": {"type": "string"}},
                "regex": {"type": "boolean"},
                "case_sensitive": {"type": "boolean"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = serde_json::from_value(args)?;
        let re = match compile_search_pattern(&args.pattern, args.regex, args.case_sensitive) {
            Ok(re) => re,
            Err(e) => {
                return Ok(json!({
                    "success": false,
                    "detail": format!("Invalid pattern '{}': {e}", args.pattern),
                    "error": "invalid_pattern",
                    "matches": [],
                    "data": [],
                }))
            }
        };

        // directory 指向文件时只搜索该文件
        let directory_is_file = self
            .fs
            .resolve(&args.directory)
            .map(|p| p.is_file())
            .unwrap_or(false);
        let single;
        let (files, directory) = if directory_is_file {
            single = [args.directory.clone()];
            (Some(&single[..]), ".")
        } else {
            (args.files.as_deref(), args.directory.as_str())
        };

        let matches = self.search(&re, files, directory)?;
        Ok(json!({
            "success": true,
            "detail": format!("Found {} match(es)", matches.len()),
            "count": matches.len(),
            "data": matches,
            "matches": matches,
        }))
    }
}
