//! 标记命令解析
//!
//! 只接受两种前缀：
//! - `composite:<type>:k=v:...`：组合能力（内部展开为多次子操作，如 analyze_directory）
//! - `semantic:<type>:k=v:...`：原子能力（如 find_files、search_content）
//!
//! 原始键名按目标能力归一化（dir → directory，pattern → name_pattern / pattern 等），
//! 并对 regex / cs 等开关做布尔转换。

use serde_json::{Map, Value};
use thiserror::Error;

pub const COMPOSITE_PREFIX: &str = "composite";
pub const SEMANTIC_PREFIX: &str = "semantic";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error(
        "Invalid command format: {0}. Commands must use 'semantic:' or 'composite:' markers."
    )]
    InvalidFormat(String),

    #[error("Invalid {prefix} marker: {marker}")]
    InvalidMarker { prefix: String, marker: String },

    #[error("Unknown {prefix} tool: {tool}")]
    UnknownTool { prefix: String, tool: String },
}

/// 标记中的能力类型 → 注册表中的能力名
fn registry_name(tool_type: &str) -> Option<&'static str> {
    Some(match tool_type {
        "analyze_directory" => "analyze_directory",
        "search_codebase" => "search_codebase",
        "find_files" | "find_files_by_pattern" => "find_files_by_pattern",
        "search_content" => "search_content",
        "analyze_python" | "analyze_python_file" => "analyze_python_file",
        "filesystem_list" => "filesystem_list",
        "filesystem_read" => "filesystem_read",
        "shell_run" => "shell_run",
        _ => return None,
    })
}

/// 标记命令解析器：parse(step) -> (能力名, 参数)
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandParser;

impl CommandParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, step: &str) -> Result<(String, Map<String, Value>), CommandParseError> {
        let step = step.trim();
        for prefix in [COMPOSITE_PREFIX, SEMANTIC_PREFIX] {
            if step
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(':'))
            {
                return self.parse_marker(step, prefix);
            }
        }
        Err(CommandParseError::InvalidFormat(step.to_string()))
    }

    fn parse_marker(
        &self,
        marker: &str,
        prefix: &str,
    ) -> Result<(String, Map<String, Value>), CommandParseError> {
        let parts: Vec<&str> = marker.split(':').collect();
        let tool_type = parts.get(1).map(|s| s.trim()).unwrap_or("");
        if tool_type.is_empty() {
            return Err(CommandParseError::InvalidMarker {
                prefix: prefix.to_string(),
                marker: marker.to_string(),
            });
        }

        let mut params: Vec<(&str, &str)> = Vec::new();
        for part in &parts[2..] {
            if let Some((key, value)) = part.split_once('=') {
                params.push((key.trim(), value));
            }
        }

        let tool_name = registry_name(tool_type).ok_or_else(|| CommandParseError::UnknownTool {
            prefix: prefix.to_string(),
            tool: tool_type.to_string(),
        })?;

        Ok((tool_name.to_string(), normalize_params(tool_name, &params)))
    }
}

fn lookup<'a>(params: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    params.iter().rev().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(v) => v.trim().eq_ignore_ascii_case("true"),
        None => default,
    }
}

/// 将原始键名映射为能力参数名
fn normalize_params(tool_name: &str, params: &[(&str, &str)]) -> Map<String, Value> {
    let mut args = Map::new();
    let mut put = |key: &str, value: &str| {
        args.insert(key.to_string(), Value::String(value.to_string()));
    };

    if let Some(v) = lookup(params, "dir") {
        put("directory", v);
    }
    if let Some(v) = lookup(params, "pattern") {
        if tool_name == "find_files_by_pattern" {
            put("name_pattern", v);
        } else {
            put("pattern", v);
        }
    }
    // analyze_python_file 的 type 表示分析类型，其它能力表示文件类型
    if tool_name != "analyze_python_file" {
        if let Some(v) = lookup(params, "type") {
            put("file_type", v);
        }
    }
    if let Some(v) = lookup(params, "file") {
        put("file_path", v);
    }
    if let Some(v) = lookup(params, "content") {
        put("content_pattern", v);
    }
    if let Some(v) = lookup(params, "path") {
        put("path", v);
    }
    if let Some(v) = lookup(params, "command") {
        put("command", v);
    }

    match tool_name {
        "search_content" => {
            args.insert(
                "regex".to_string(),
                Value::Bool(parse_flag(lookup(params, "regex"), true)),
            );
            args.insert(
                "case_sensitive".to_string(),
                Value::Bool(parse_flag(lookup(params, "cs"), false)),
            );
        }
        "analyze_python_file" => {
            if let Some(v) = lookup(params, "file_path") {
                args.insert("file_path".to_string(), Value::String(v.to_string()));
            }
            let analysis = lookup(params, "analysis_type")
                .or_else(|| lookup(params, "type"))
                .unwrap_or("all");
            args.insert(
                "analysis_type".to_string(),
                Value::String(analysis.to_string()),
            );
        }
        _ => {}
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_composite_marker() {
        let (name, args) = CommandParser::new()
            .parse("composite:analyze_directory:dir=.:pattern=*.py")
            .unwrap();
        assert_eq!(name, "analyze_directory");
        assert_eq!(args["directory"], json!("."));
        assert_eq!(args["pattern"], json!("*.py"));
    }

    #[test]
    fn test_find_files_pattern_becomes_name_pattern() {
        let (name, args) = CommandParser::new()
            .parse("semantic:find_files:dir=src:pattern=test_*.py:type=f")
            .unwrap();
        assert_eq!(name, "find_files_by_pattern");
        assert_eq!(args["directory"], json!("src"));
        assert_eq!(args["name_pattern"], json!("test_*.py"));
        assert_eq!(args["file_type"], json!("f"));
        assert!(args.get("pattern").is_none());
    }

    #[test]
    fn test_search_content_flags() {
        let (_, args) = CommandParser::new()
            .parse("semantic:search_content:pattern=TODO:regex=false:cs=TRUE")
            .unwrap();
        assert_eq!(args["regex"], json!(false));
        assert_eq!(args["case_sensitive"], json!(true));

        let (_, args) = CommandParser::new()
            .parse("semantic:search_content:pattern=TODO")
            .unwrap();
        assert_eq!(args["regex"], json!(true));
        assert_eq!(args["case_sensitive"], json!(false));
    }

    #[test]
    fn test_analyze_python_type_is_analysis_type() {
        let (name, args) = CommandParser::new()
            .parse("semantic:analyze_python:file=pkg/mod.py:type=classes")
            .unwrap();
        assert_eq!(name, "analyze_python_file");
        assert_eq!(args["file_path"], json!("pkg/mod.py"));
        assert_eq!(args["analysis_type"], json!("classes"));
        assert!(args.get("file_type").is_none());
    }

    #[test]
    fn test_analyze_python_defaults_to_all() {
        let (_, args) = CommandParser::new()
            .parse("semantic:analyze_python_file:file_path=a.py")
            .unwrap();
        assert_eq!(args["file_path"], json!("a.py"));
        assert_eq!(args["analysis_type"], json!("all"));
    }

    #[test]
    fn test_value_keeps_equals_sign() {
        let (_, args) = CommandParser::new()
            .parse("semantic:shell_run:command=grep -c a=b setup.py")
            .unwrap();
        assert_eq!(args["command"], json!("grep -c a=b setup.py"));
    }

    #[test]
    fn test_unrecognized_prefix_is_format_error() {
        let err = CommandParser::new().parse("shell:run").unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidFormat(_)));
        assert!(err.to_string().contains("Invalid command format"));

        let err = CommandParser::new().parse("list all python files").unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidFormat(_)));

        let err = CommandParser::new().parse("semanticfoo:bar").unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_unknown_tool_and_empty_type() {
        let err = CommandParser::new().parse("semantic:delete_all").unwrap_err();
        assert_eq!(
            err,
            CommandParseError::UnknownTool {
                prefix: "semantic".into(),
                tool: "delete_all".into()
            }
        );

        let err = CommandParser::new().parse("composite:").unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidMarker { .. }));
    }
}
