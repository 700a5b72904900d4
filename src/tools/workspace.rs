//! 沙箱工作区
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! 文件查找、内容搜索、代码分析等能力都通过它定位文件。

use std::path::{Component, Path, PathBuf};

use crate::core::FsError;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析为根目录下的规范路径；逃逸返回 PathEscape（先按字面判断，不论是否存在），不存在返回 NotFound
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == "./" {
            return Ok(self.root_dir.clone());
        }
        let trimmed = trimmed.trim_start_matches("./");
        if !self.contains(trimmed) {
            return Err(FsError::PathEscape(path.to_string())); // 如 ../../etc/passwd
        }
        let canonical = self
            .root_dir
            .join(trimmed)
            .canonicalize()
            .map_err(|_| FsError::NotFound(path.to_string()))?;
        // 符号链接可能指向根外
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(FsError::PathEscape(path.to_string()))
        }
    }

    /// 字面判断路径（相对根目录或绝对路径）是否落在根下，不访问文件系统
    pub fn contains(&self, path: &str) -> bool {
        if path.starts_with('~') {
            return false;
        }
        normalize(&self.root_dir.join(path)).starts_with(&self.root_dir)
    }

    /// 根目录下的相对路径（用于返回给 LLM，便于回填到下一条命令）
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.resolve(path)?;
        read_lossy(&resolved).map_err(|source| FsError::Io {
            path: path.to_string(),
            source,
        })
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let base = self.resolve(path)?;
        let io_err = |source| FsError::Io {
            path: path.to_string(),
            source,
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(io_err)? {
            let e = e.map_err(io_err)?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// 去掉 `.`，`..` 弹出上一级
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 读取文本，非法 UTF-8 字节按替换字符处理
pub fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
