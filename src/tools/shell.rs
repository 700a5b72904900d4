//! Shell 能力：shell_run，白名单命令，禁止危险操作
//!
//! 命令按 shell 词法拆成 argv 后直接执行，不经过 sh，因此拒绝 `;`、`&`、`|`、重定向、命令替换等元字符。
//! 检查顺序：禁止子串 → 元字符 → 首词白名单 → 各命令的写入/执行类参数 → 路径类参数必须在工作区内。
//! 实际执行交给 AgentApi.system（超时由 SystemApi 实现负责），违规以 SafetyViolation 上报。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{FsError, ToolError, Violation};
use crate::tools::{SafeFs, ShellError, SystemApi, Tool};

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

/// 不经过 shell 也应拒绝的元字符：串联、管道、重定向、命令替换
const SHELL_METACHARS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n", "\r"];

/// 默认白名单：只读类命令
pub fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "grep", "find", "echo", "pwd", "tree", "file", "du",
        "sort", "sleep",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// 各命令中会写文件或执行其它程序的参数
fn forbidden_flags(command: &str) -> &'static [&'static str] {
    match command {
        "find" => &[
            "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf",
            "-fls",
        ],
        "sort" => &["-o", "--output"],
        "tree" => &["-o"],
        "file" => &["-C", "--compile"],
        _ => &[],
    }
}

fn is_forbidden_flag(command: &str, arg: &str) -> bool {
    let flags = forbidden_flags(command);
    let name = arg.split('=').next().unwrap_or(arg);
    if flags.contains(&name) {
        return true;
    }
    // 合并短参数，如 sort -ro out.txt
    if !arg.starts_with("--") && arg.len() > 2 && command != "find" {
        if let Some(short) = arg.strip_prefix('-') {
            return flags
                .iter()
                .filter_map(|f| f.strip_prefix('-'))
                .filter(|f| f.len() == 1)
                .any(|f| short.contains(f));
        }
    }
    false
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellArgs {
    #[serde(default)]
    command: String,
}

/// shell_run：仅允许白名单内命令，路径限制在工作区
pub struct ShellRunTool {
    system: Option<Arc<dyn SystemApi>>,
    allowed_commands: HashSet<String>,
    fs: SafeFs,
}

impl ShellRunTool {
    pub fn new(system: Option<Arc<dyn SystemApi>>, allowed_commands: Vec<String>, fs: SafeFs) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            system,
            allowed_commands,
            fs,
        }
    }

    fn check_allowed(&self, raw: &str) -> Result<(), Violation> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(Violation::new(
                    "forbidden_pattern",
                    format!("Forbidden pattern: {}", forbidden),
                ));
            }
        }
        if let Some(meta) = SHELL_METACHARS.iter().find(|m| raw.contains(*m)) {
            return Err(Violation::new(
                "shell_metachar",
                format!("Shell metacharacter not allowed: {}", meta.escape_debug()),
            ));
        }

        let argv = shell_words::split(raw).map_err(|e| {
            Violation::new("unparseable_command", format!("Cannot parse command: {e}"))
        })?;
        let Some((name, args)) = argv.split_first() else {
            return Err(Violation::new("command_not_allowed", "Empty command"));
        };
        let name = name.to_lowercase();
        if !self.allowed_commands.contains(&name) {
            return Err(Violation::new(
                "command_not_allowed",
                format!("Command '{}' not in allowlist", name),
            ));
        }

        for arg in args {
            if arg.starts_with('-') && is_forbidden_flag(&name, arg) {
                return Err(Violation::new(
                    "forbidden_argument",
                    format!("Argument '{}' not allowed for {}", arg, name),
                ));
            }
            let value = match arg.split_once('=') {
                Some((_, v)) if arg.starts_with('-') => v,
                _ if arg.starts_with('-') => continue,
                _ => arg.as_str(),
            };
            if let Err(FsError::PathEscape(p)) = self.fs.resolve(value) {
                return Err(Violation::new(
                    "path_escape",
                    format!("Path escapes workspace: {}", p),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellRunTool {
    fn name(&self) -> &str {
        "shell_run"
    }

    fn description(&self) -> &str {
        "Run an allowlisted read-only command in the workspace (no pipes, redirection or chaining). Args: {\"command\": \"e.g. wc -l setup.py\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "A single command with arguments (must be in allowlist, paths inside the workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ShellArgs = serde_json::from_value(args)?;
        let Some(system) = self.system.as_deref() else {
            return Ok(json!({
                "success": false,
                "detail": "System API is unavailable",
                "error": "api_unavailable",
            }));
        };

        let command = args.command.trim();
        if command.is_empty() {
            return Ok(json!({
                "success": false,
                "detail": "Shell command is empty",
                "error": "missing_argument",
            }));
        }
        self.check_allowed(command)
            .map_err(ToolError::SafetyViolation)?;

        tracing::info!(command = %command, "shell_run execute");

        match system.run_shell_command(command).await {
            Ok(output) => Ok(json!({
                "success": output.exit_code == 0,
                "detail": format!("Command exited with {}", output.exit_code),
                "data": output,
                "type": "system.run_shell_command",
            })),
            Err(ShellError::Timeout(secs)) => {
                tracing::warn!(command = %command, timeout_secs = secs, "Shell command timed out");
                Err(ToolError::Timeout(format!("command '{command}' exceeded {secs}s")))
            }
            Err(e @ ShellError::Spawn(_)) => {
                tracing::warn!(command = %command, error = %e, "Shell command failed");
                Ok(json!({
                    "success": false,
                    "detail": format!("Command error: {e}"),
                    "error": "command_error",
                }))
            }
        }
    }
}
