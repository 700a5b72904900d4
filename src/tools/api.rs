//! 底层平台 API：文件系统访问器与 Shell 执行器
//!
//! 两者在 AgentApi 上均为可选；缺失时对应能力返回 `api_unavailable` 失败而不是崩溃。
//! LocalFilesystem 基于 SafeFs，LocalShell 把命令按 shell 词法拆成 argv 直接执行（不启动 sh），带超时。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

use crate::core::FsError;
use crate::tools::SafeFs;

/// 文件系统访问器
pub trait FilesystemApi: Send + Sync {
    fn list_directory(&self, path: &str) -> Result<Vec<String>, FsError>;

    fn read(&self, path: &str) -> Result<String, FsError>;

    fn is_dir(&self, path: &str) -> bool;
}

/// Shell 命令输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("Execution failed: {0}")]
    Spawn(String),
}

/// Shell 执行器
#[async_trait]
pub trait SystemApi: Send + Sync {
    async fn run_shell_command(&self, command: &str) -> Result<ShellOutput, ShellError>;
}

/// 处理器可用的平台 API 集合
#[derive(Clone, Default)]
pub struct AgentApi {
    pub filesystem: Option<Arc<dyn FilesystemApi>>,
    pub system: Option<Arc<dyn SystemApi>>,
}

impl AgentApi {
    /// 绑定到工作区根目录的本地实现
    pub fn local(root: impl AsRef<Path>, shell_timeout_secs: u64) -> Self {
        let root = root.as_ref();
        Self {
            filesystem: Some(Arc::new(LocalFilesystem::new(root))),
            system: Some(Arc::new(LocalShell::new(root, shell_timeout_secs))),
        }
    }
}

/// 本地文件系统（沙箱内）
pub struct LocalFilesystem {
    fs: SafeFs,
}

impl LocalFilesystem {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root),
        }
    }
}

impl FilesystemApi for LocalFilesystem {
    fn list_directory(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.fs.list_dir(path)
    }

    fn read(&self, path: &str) -> Result<String, FsError> {
        self.fs.read_file(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.fs.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }
}

/// 本地 Shell：在工作区目录下执行，超时后终止子进程
pub struct LocalShell {
    workdir: PathBuf,
    timeout_secs: u64,
}

impl LocalShell {
    pub fn new(workdir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl SystemApi for LocalShell {
    async fn run_shell_command(&self, command: &str) -> Result<ShellOutput, ShellError> {
        let argv = shell_words::split(command).map_err(|e| ShellError::Spawn(e.to_string()))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ShellError::Spawn("empty command".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| ShellError::Timeout(self.timeout_secs))?
            .map_err(|e| ShellError::Spawn(e.to_string()))?;

        Ok(ShellOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
