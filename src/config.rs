//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `EXPLORE__*` 覆盖（双下划线表示嵌套，如 `EXPLORE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub context: ContextSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub rag: RagSection,
}

/// [agent] 段：迭代上限、目标校验、每次规划的步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub max_goal_length: usize,
    /// 目标中出现即拒绝（不区分大小写）
    pub disallowed_keywords: Vec<String>,
    pub max_steps_per_plan: usize,
    /// 是否把成功步骤的摘要写入临时向量记忆
    pub record_findings: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_goal_length: 500,
            disallowed_keywords: vec!["exploit".into(), "destruct".into(), "exfiltrate".into()],
            max_steps_per_plan: 5,
            record_findings: true,
        }
    }
}

/// [context] 段：上下文字符上限与淘汰时至少保留的条目数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub max_chars: usize,
    pub min_retained: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_chars: 32_000,
            min_retained: 3,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；无 API Key 时回退到 mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：工作区根、能力调用超时、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 工作区根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 单次能力调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: 60,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：命令超时与允许的命令名（argv[0]，如 ls、grep、wc）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub timeout_secs: u64,
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            allowed_commands: crate::tools::shell::default_allowed_commands(),
        }
    }
}

/// [rag] 段：临时向量记忆
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub max_entries: usize,
    pub similarity_threshold: f32,
    pub embedding: EmbeddingSection,
    pub sqlite: SqliteSection,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            max_entries: crate::memory::MAX_TEMP_RAG_ENTRIES,
            similarity_threshold: crate::memory::DEFAULT_SIMILARITY_THRESHOLD,
            embedding: EmbeddingSection::default(),
            sqlite: SqliteSection::default(),
        }
    }
}

/// [rag.embedding] 段：外部嵌入模型（OpenAI 兼容）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "text-embedding-3-small".to_string(),
            base_url: None,
        }
    }
}

/// [rag.sqlite] 段：可选镜像后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteSection {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for SqliteSection {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("explore_findings.db"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 EXPLORE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 EXPLORE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("EXPLORE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.max_goal_length, 500);
        assert_eq!(cfg.context.max_chars, 32_000);
        assert_eq!(cfg.context.min_retained, 3);
        assert_eq!(cfg.tools.tool_timeout_secs, 60);
        assert_eq!(cfg.tools.shell.timeout_secs, 30);
        assert_eq!(cfg.rag.max_entries, 1_000);
        assert!(!cfg.rag.embedding.enabled);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("explore.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 3\n\n[tools.shell]\ntimeout_secs = 5\n\n[rag]\nsimilarity_threshold = 0.5\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.max_steps_per_plan, 5);
        assert_eq!(cfg.tools.shell.timeout_secs, 5);
        assert!((cfg.rag.similarity_threshold - 0.5).abs() < f32::EPSILON);
    }
}
