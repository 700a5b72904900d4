//! Python 结构分析：analyze_python_file
//!
//! 逐行扫描源码（跳过多行字符串内部），提取：
//! - 函数：所有 `def`（含方法），名称、行号、docstring
//! - 类：名称、行号、docstring、直接定义的方法
//! - 导入：`import a, b` 与 `from x import (y, z)`（模块记为 `x.y`）
//!
//! 扫描前先做轻量语法检查（括号配对、字符串闭合）；不通过的文件不计入任何定义。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::core::{FsError, ToolError};
use crate::tools::workspace::read_lossy;
use crate::tools::{SafeFs, Tool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line: usize,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub line: usize,
    pub docstring: Option<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportInfo {
    pub module: String,
    /// `import` 或 `from_import`
    #[serde(rename = "type")]
    pub kind: String,
}

/// 一个模块的结构
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PythonModule {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
}

static DEF_RE: OnceLock<Regex> = OnceLock::new();
static CLASS_RE: OnceLock<Regex> = OnceLock::new();
static FROM_RE: OnceLock<Regex> = OnceLock::new();

fn def_re() -> &'static Regex {
    DEF_RE.get_or_init(|| Regex::new(r"^def\s+([A-Za-z_]\w*)").unwrap())
}

fn class_re() -> &'static Regex {
    CLASS_RE.get_or_init(|| Regex::new(r"^class\s+([A-Za-z_]\w*)").unwrap())
}

fn from_re() -> &'static Regex {
    FROM_RE.get_or_init(|| Regex::new(r"^from\s+(\S+)\s+import\s+(.*)$").unwrap())
}

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

/// 去掉行尾注释（忽略引号内的 #）
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return &line[..i],
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// 标记每一行是否从代码状态开始（false 表示处于多行字符串内部）
fn code_mask(lines: &[&str]) -> Vec<bool> {
    let mut mask = Vec::with_capacity(lines.len());
    let mut open: Option<&str> = None;
    for line in lines {
        mask.push(open.is_none());
        let mut rest: &str = line;
        loop {
            match open {
                Some(delim) => match rest.find(delim) {
                    Some(pos) => {
                        rest = &rest[pos + delim.len()..];
                        open = None;
                    }
                    None => break,
                },
                None => {
                    let code = strip_comment(rest);
                    let next = TRIPLE_QUOTES
                        .iter()
                        .filter_map(|d| code.find(d).map(|pos| (pos, *d)))
                        .min_by_key(|(pos, _)| *pos);
                    match next {
                        Some((pos, delim)) => {
                            rest = &rest[pos + delim.len()..];
                            open = Some(delim);
                        }
                        None => break,
                    }
                }
            }
        }
    }
    mask
}

/// inspect.cleandoc 风格的缩进清理
fn clean_docstring(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0);
    let mut cleaned: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 {
                l.trim_start().to_string()
            } else {
                l.get(margin..).unwrap_or("").trim_end().to_string()
            }
        })
        .collect();
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    cleaned.join("\n")
}

struct Scanner<'a> {
    lines: Vec<&'a str>,
    code: Vec<bool>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let code = code_mask(&lines);
        Self { lines, code }
    }

    /// 定义头的结束行；第二项为冒号后是否跟着同一行的函数体
    fn header_end(&self, start: usize) -> (usize, bool) {
        let mut depth: i32 = 0;
        for j in start..self.lines.len().min(start + 64) {
            let code = strip_comment(self.lines[j]);
            let mut colon = None;
            for (pos, c) in code.char_indices() {
                match c {
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth -= 1,
                    ':' if depth == 0 && colon.is_none() => colon = Some(pos),
                    _ => {}
                }
            }
            if depth <= 0 {
                if let Some(pos) = colon {
                    return (j, !code[pos + 1..].trim().is_empty());
                }
            }
        }
        (start, true)
    }

    /// 定义体的第一条语句若为字符串字面量，则作为 docstring
    fn docstring_after(&self, header_end: usize) -> Option<String> {
        let k = (header_end + 1..self.lines.len()).find(|&k| !is_blank_or_comment(self.lines[k]))?;
        let text = self.lines[k].trim_start();
        let body = text.trim_start_matches(['r', 'R', 'u', 'U']);
        if body.len() + 1 < text.len() {
            return None;
        }

        for delim in TRIPLE_QUOTES {
            if let Some(rest) = body.strip_prefix(delim) {
                if let Some(end) = rest.find(delim) {
                    return Some(clean_docstring(&rest[..end]));
                }
                let mut raw = rest.to_string();
                for line in &self.lines[k + 1..] {
                    raw.push('\n');
                    if let Some(end) = line.find(delim) {
                        raw.push_str(&line[..end]);
                        return Some(clean_docstring(&raw));
                    }
                    raw.push_str(line);
                }
                return None;
            }
        }
        for quote in ['"', '\''] {
            if let Some(rest) = body.strip_prefix(quote) {
                return rest.find(quote).map(|end| clean_docstring(&rest[..end]));
            }
        }
        None
    }

    fn methods_of(&self, class_indent: usize, header_end: usize) -> Vec<String> {
        let mut methods = Vec::new();
        let mut body_indent = None;
        for k in header_end + 1..self.lines.len() {
            let line = self.lines[k];
            if !self.code[k] || is_blank_or_comment(line) {
                continue;
            }
            let indent = indent_of(line);
            if indent <= class_indent {
                break;
            }
            let body_indent = *body_indent.get_or_insert(indent);
            if indent == body_indent {
                if let Some(cap) = def_re().captures(line.trim_start()) {
                    methods.push(cap[1].to_string());
                }
            }
        }
        methods
    }

    /// `from x import ...` 的名称部分；括号或反斜杠续行时拼接后续行
    fn import_names(&self, start: usize, first: &str) -> String {
        let mut names = strip_comment(first).trim().to_string();
        let mut k = start;
        let parenthesized = names.starts_with('(');
        while (parenthesized && !names.contains(')')) || names.ends_with('\\') {
            k += 1;
            let Some(next) = self.lines.get(k) else { break };
            names = names.trim_end_matches('\\').to_string();
            names.push(' ');
            names.push_str(strip_comment(next).trim());
        }
        names.replace(['(', ')', '\\'], " ")
    }

    fn scan(&self) -> PythonModule {
        let mut module = PythonModule::default();
        for (i, line) in self.lines.iter().enumerate() {
            if !self.code[i] {
                continue;
            }
            let text = line.trim_start();
            if let Some(cap) = def_re().captures(text) {
                let (end, inline) = self.header_end(i);
                module.functions.push(FunctionInfo {
                    name: cap[1].to_string(),
                    line: i + 1,
                    docstring: if inline { None } else { self.docstring_after(end) },
                });
            } else if let Some(cap) = class_re().captures(text) {
                let (end, inline) = self.header_end(i);
                let (docstring, methods) = if inline {
                    (None, Vec::new())
                } else {
                    (self.docstring_after(end), self.methods_of(indent_of(line), end))
                };
                module.classes.push(ClassInfo {
                    name: cap[1].to_string(),
                    line: i + 1,
                    docstring,
                    methods,
                });
            } else if let Some(rest) = text.strip_prefix("import ") {
                for name in strip_comment(rest).split(',') {
                    if let Some(module_name) = name.split_whitespace().next() {
                        module.imports.push(ImportInfo {
                            module: module_name.trim_end_matches(';').to_string(),
                            kind: "import".to_string(),
                        });
                    }
                }
            } else if let Some(cap) = from_re().captures(text) {
                let base = cap[1].trim_start_matches('.');
                for name in self.import_names(i, &cap[2]).split(',') {
                    if let Some(imported) = name.split_whitespace().next() {
                        module.imports.push(ImportInfo {
                            module: format!("{base}.{imported}"),
                            kind: "from_import".to_string(),
                        });
                    }
                }
            }
        }
        module
    }
}

/// 扫描 Python 源码结构（不做语法检查）
pub fn scan_python(source: &str) -> PythonModule {
    Scanner::new(source).scan()
}

/// 源码语法错误，行号从 1 开始
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (line {line})")]
pub struct PythonSyntaxError {
    pub line: usize,
    pub message: String,
}

fn syntax_error(line: usize, message: impl Into<String>) -> PythonSyntaxError {
    PythonSyntaxError {
        line,
        message: message.into(),
    }
}

/// 轻量语法检查：字符串与注释之外的括号必须配对，字符串必须闭合
pub fn check_python_syntax(source: &str) -> Result<(), PythonSyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '"' | '\'' => {
                let start = line;
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                i += if triple { 3 } else { 1 };
                loop {
                    let Some(&ch) = chars.get(i) else {
                        let message = if triple {
                            "unterminated triple-quoted string literal"
                        } else {
                            "unterminated string literal"
                        };
                        return Err(syntax_error(start, message));
                    };
                    match ch {
                        '\\' => {
                            // 反斜杠续行（含 CRLF）
                            if chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n') {
                                i += 1;
                            }
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                            }
                            i += 2;
                            continue;
                        }
                        '\n' if !triple => {
                            return Err(syntax_error(start, "unterminated string literal"))
                        }
                        '\n' => line += 1,
                        q if q == c => {
                            if !triple {
                                i += 1;
                                break;
                            }
                            if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                                i += 3;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, _)) => {
                        return Err(syntax_error(
                            line,
                            format!("closing parenthesis '{c}' does not match opening parenthesis '{open}'"),
                        ))
                    }
                    None => return Err(syntax_error(line, format!("unmatched '{c}'"))),
                }
            }
            _ => {}
        }
        i += 1;
    }
    match stack.pop() {
        Some((open, open_line)) => Err(syntax_error(open_line, format!("'{open}' was never closed"))),
        None => Ok(()),
    }
}

/// 语法检查通过后扫描结构
pub fn parse_python(source: &str) -> Result<PythonModule, PythonSyntaxError> {
    check_python_syntax(source)?;
    Ok(scan_python(source))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyzeArgs {
    file_path: String,
    #[serde(default = "default_analysis_type")]
    analysis_type: String,
}

fn default_analysis_type() -> String {
    "all".to_string()
}

/// analyze_python_file 能力
pub struct PythonAnalyzer {
    fs: SafeFs,
}

impl PythonAnalyzer {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for PythonAnalyzer {
    fn name(&self) -> &str {
        "analyze_python_file"
    }

    fn description(&self) -> &str {
        "Analyze a Python file's structure. Args: {\"file_path\": \"pkg/mod.py\", \"analysis_type\": \"functions | classes | imports | all\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "analysis_type": {"type": "string", "enum": ["functions", "classes", "imports", "all"]}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: AnalyzeArgs = serde_json::from_value(args)?;
        let kind = args.analysis_type.as_str();
        if !matches!(kind, "functions" | "classes" | "imports" | "all") {
            return Ok(json!({
                "success": false,
                "data": [],
                "detail": format!("Analysis type '{kind}' not recognized"),
                "error": "invalid_analysis_type",
            }));
        }

        let source = match self.fs.resolve(&args.file_path) {
            Ok(path) => read_lossy(&path).map_err(|e| e.to_string()),
            Err(FsError::PathEscape(p)) => return Err(FsError::PathEscape(p).into()),
            Err(e) => Err(e.to_string()),
        };
        let source = match source {
            Ok(s) => s,
            Err(reason) => {
                tracing::warn!(file = %args.file_path, error = %reason, "Python analysis failed");
                return Ok(json!({
                    "success": false,
                    "data": [],
                    "detail": format!("Failed to analyze {}: {reason}", args.file_path),
                    "error": "analysis_error",
                }));
            }
        };

        let module = match parse_python(&source) {
            Ok(module) => module,
            Err(e) => {
                tracing::warn!(file = %args.file_path, error = %e, "Python source has syntax errors");
                return Ok(json!({
                    "success": false,
                    "data": [],
                    "detail": format!("Failed to analyze {}: {e}", args.file_path),
                    "error": "syntax_error",
                }));
            }
        };
        let mut result = Map::new();
        let mut parts = Vec::new();
        if matches!(kind, "functions" | "all") {
            parts.push(format!("{} functions", module.functions.len()));
            result.insert("functions".into(), serde_json::to_value(&module.functions)?);
        }
        if matches!(kind, "classes" | "all") {
            parts.push(format!("{} classes", module.classes.len()));
            result.insert("classes".into(), serde_json::to_value(&module.classes)?);
        }
        if matches!(kind, "imports" | "all") {
            parts.push(format!("{} imports", module.imports.len()));
            result.insert("imports".into(), serde_json::to_value(&module.imports)?);
        }

        let mut out = result.clone();
        out.insert("success".into(), Value::Bool(true));
        out.insert(
            "detail".into(),
            Value::String(format!("Analyzed {}: {}", args.file_path, parts.join(", "))),
        );
        out.insert("data".into(), Value::Object(result));
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##""""Module docstring with def fake(): inside."""
import os, sys as system
from typing import (
    Any,
    Dict as D,
)
from . import sibling


def top_level(a: int,
              b: Dict[str, int] = {}) -> int:
    """Add things.

    Longer description.
    """
    return a


class Greeter(Base):
    '''Says hello.'''

    greeting = "hi"

    @staticmethod
    def hello(self):
        def inner():
            pass
        return self.greeting

    def bye(self): return None


class Empty: pass
"##;

    #[test]
    fn test_scan_functions() {
        let module = scan_python(SAMPLE);
        let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["top_level", "hello", "inner", "bye"]);
        assert_eq!(module.functions[0].line, 10);
        assert_eq!(
            module.functions[0].docstring.as_deref(),
            Some("Add things.\n\nLonger description.")
        );
        assert_eq!(module.functions[3].docstring, None);
    }

    #[test]
    fn test_scan_classes() {
        let module = scan_python(SAMPLE);
        assert_eq!(module.classes.len(), 2);
        let greeter = &module.classes[0];
        assert_eq!(greeter.name, "Greeter");
        assert_eq!(greeter.docstring.as_deref(), Some("Says hello."));
        assert_eq!(greeter.methods, vec!["hello", "bye"]);
        assert_eq!(module.classes[1].name, "Empty");
        assert!(module.classes[1].methods.is_empty());
    }

    #[test]
    fn test_scan_imports() {
        let module = scan_python(SAMPLE);
        let imports: Vec<(&str, &str)> = module
            .imports
            .iter()
            .map(|i| (i.module.as_str(), i.kind.as_str()))
            .collect();
        assert_eq!(
            imports,
            vec![
                ("os", "import"),
                ("sys", "import"),
                ("typing.Any", "from_import"),
                ("typing.Dict", "from_import"),
                (".sibling", "from_import"),
            ]
        );
    }

    #[test]
    fn test_multiline_string_is_skipped() {
        let source = "x = \"\"\"\nclass NotAClass:\n    def nope(self): pass\n\"\"\"\ndef real():\n    pass\n";
        let module = scan_python(source);
        assert!(module.classes.is_empty());
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "real");
    }

    #[tokio::test]
    async fn test_tool_analysis_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.py"), SAMPLE).unwrap();
        let tool = PythonAnalyzer::new(SafeFs::new(dir.path()));

        let out = tool.execute(json!({"file_path": "m.py"})).await.unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["classes"][0]["methods"], json!(["hello", "bye"]));
        assert_eq!(out["data"]["imports"][0], json!({"module": "os", "type": "import"}));

        let out = tool
            .execute(json!({"file_path": "m.py", "analysis_type": "classes"}))
            .await
            .unwrap();
        assert!(out.get("functions").is_none());
        assert_eq!(out["detail"], json!("Analyzed m.py: 2 classes"));

        let out = tool
            .execute(json!({"file_path": "m.py", "analysis_type": "everything"}))
            .await
            .unwrap();
        assert_eq!(out["error"], json!("invalid_analysis_type"));

        let out = tool.execute(json!({"file_path": "gone.py"})).await.unwrap();
        assert_eq!(out["error"], json!("analysis_error"));
    }

    #[test]
    fn test_syntax_check() {
        assert!(check_python_syntax(SAMPLE).is_ok());
        assert!(check_python_syntax("s = 'it\\'s'  # (unclosed in comment\nx = \"a\\\nb\"\n").is_ok());

        let err = check_python_syntax("def broken(:\n    pass\n").unwrap_err();
        assert_eq!(err, syntax_error(1, "'(' was never closed"));

        let err = check_python_syntax("x = [1, 2)\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("does not match"));

        let err = check_python_syntax("a = 1\nb = 2)\n").unwrap_err();
        assert_eq!(err, syntax_error(2, "unmatched ')'"));

        let err = check_python_syntax("a = 1\nname = 'oops\nclass Ghost:\n    pass\n").unwrap_err();
        assert_eq!(err, syntax_error(2, "unterminated string literal"));

        let err = check_python_syntax("def f():\n    \"\"\"never ends\n").unwrap_err();
        assert_eq!(err.message, "unterminated triple-quoted string literal");
    }

    #[tokio::test]
    async fn test_broken_file_reports_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.py"), "class Ghost:\n    def run(self:\n        pass\n").unwrap();
        let tool = PythonAnalyzer::new(SafeFs::new(dir.path()));

        let out = tool.execute(json!({"file_path": "bad.py"})).await.unwrap();
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["error"], json!("syntax_error"));
        assert_eq!(out["data"], json!([]));
        assert!(out["detail"].as_str().unwrap().starts_with("Failed to analyze bad.py: "));
        assert!(parse_python("class Ghost:\n    def run(self:\n").is_err());
    }
}
