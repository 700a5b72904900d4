//! 探索 Agent：有界迭代的 规划 → 执行 → 汇总 循环
//!
//! 每次 `run` 重建单次运行状态（历史、上下文、临时记忆），校验目标后进入循环：
//! 每轮只执行 Planner 返回的第一个步骤，结果折叠进上下文，直到 Planner 不再给出步骤或迭代用尽。
//! 结束时生成 Markdown 报告。只有目标校验失败会返回 Err。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::config::{AgentSection, AppConfig, ContextSection, LlmSection};
use crate::core::{AgentError, HistoryEvent, Phase, RunStatus};
use crate::llm::{
    create_deepseek_client, deepseek_api_key, select_embedder, LlmClient, MockLlmClient,
    OpenAiClient,
};
use crate::memory::{RagMatch, SqliteRagBackend, TempRagStore};
use crate::react::{ContextManager, LlmReasoningService, Planner, Step};
use crate::tools::{ActionExecutor, AgentApi, ExecutionResult, ExecutorSettings};

/// 写入临时记忆的单条摘要上限（字符）
const MAX_FINDING_CHARS: usize = 100_000;

/// 探索 Agent：Planner、ActionExecutor、临时记忆与单次运行状态
pub struct ExploreAgent {
    planner: Planner,
    executor: ActionExecutor,
    rag: TempRagStore,
    context: ContextManager,
    history: Vec<HistoryEvent>,
    settings: AgentSection,
}

impl ExploreAgent {
    pub fn new(
        planner: Planner,
        executor: ActionExecutor,
        rag: TempRagStore,
        settings: AgentSection,
        context_settings: ContextSection,
    ) -> Self {
        let context = ContextManager::new(context_settings.max_chars, context_settings.min_retained);
        Self {
            planner,
            executor,
            rag,
            context,
            history: Vec::new(),
            settings,
        }
    }

    /// 配置中的默认迭代上限
    pub fn max_iterations(&self) -> usize {
        self.settings.max_iterations
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn rag(&self) -> &TempRagStore {
        &self.rag
    }

    /// 检索本次运行记录的相似发现
    pub fn recall(&self, query: &str, k: usize) -> Vec<RagMatch> {
        self.rag.query(query, k)
    }

    /// 运行一次探索，返回 Markdown 报告
    pub async fn run(&mut self, goal: &str, max_iterations: usize) -> Result<String, AgentError> {
        self.history.clear();
        self.context.reset();
        self.rag.reset();

        let (goal, warnings, original_length) = self.validate_goal(goal)?;

        let mut start = HistoryEvent::new(Phase::Start, 0, format!("Starting exploration: {goal}"));
        if !warnings.is_empty() {
            start = start
                .with_metadata("warnings", json!(warnings))
                .with_metadata("original_length", json!(original_length));
        }
        self.history.push(start);
        tracing::info!(goal = %goal, max_iterations, "Exploration started");

        let mut iterations = 0;
        for iteration in 1..=max_iterations {
            iterations = iteration;

            let planning_context = self.context.get_planning_context();
            let outcome = self
                .planner
                .plan(&goal, &planning_context, self.settings.max_steps_per_plan)
                .await;

            let step_texts: Vec<String> = outcome.steps.iter().map(Step::to_string).collect();
            let mut plan_event = HistoryEvent::new(
                Phase::Plan,
                iteration,
                format!("Planned {} step(s)", step_texts.len()),
            )
            .with_metadata("steps", json!(step_texts));
            if let Some(error) = &outcome.error {
                plan_event = plan_event.with_metadata("planner_error", json!(error));
            }
            self.history.push(plan_event);

            let Some(step) = outcome.steps.into_iter().next() else {
                tracing::info!(iteration, "No further steps, exploration finished");
                break;
            };
            let step_text = step.to_string();

            let result = self.execute(&step).await;
            self.history.push(execute_event(iteration, &step_text, &result));

            let summary = self.context.update_context(&step_text, &result);
            if self.settings.record_findings && result.success {
                self.record_finding(&summary, &step_text, iteration);
            }

            self.history.push(HistoryEvent::new(
                Phase::Synthesize,
                iteration,
                "Result accumulated into context",
            ));
        }

        let status = RunStatus::from_history(&self.history);
        self.history.push(HistoryEvent::new(
            Phase::Complete,
            iterations,
            format!("Exploration {status} after {iterations} iteration(s)"),
        ));
        tracing::info!(%status, iterations, "Exploration finished");

        Ok(self.build_report(&goal, status, iterations))
    }

    /// 校验并规范化目标；返回 (目标, 警告, 原始长度)
    fn validate_goal(&self, goal: &str) -> Result<(String, Vec<String>, usize), AgentError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::InvalidGoal("goal must not be empty".to_string()));
        }

        let lowered = goal.to_lowercase();
        if let Some(keyword) = self
            .settings
            .disallowed_keywords
            .iter()
            .find(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
        {
            return Err(AgentError::InvalidGoal(format!(
                "goal contains disallowed keyword: {keyword}"
            )));
        }

        let original_length = goal.chars().count();
        let mut warnings = Vec::new();
        let goal = if original_length > self.settings.max_goal_length {
            let warning = format!(
                "Goal truncated from {original_length} to {} characters",
                self.settings.max_goal_length
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
            goal.chars().take(self.settings.max_goal_length).collect()
        } else {
            goal.to_string()
        };
        Ok((goal, warnings, original_length))
    }

    async fn execute(&self, step: &Step) -> ExecutionResult {
        match step {
            Step::Command(command) => self.executor.execute_step(command).await,
            Step::Invocation(call) => self.executor.execute_tool_call(call).await,
        }
    }

    fn record_finding(&mut self, summary: &str, step: &str, iteration: usize) {
        let text: String = summary.chars().take(MAX_FINDING_CHARS).collect();
        let mut metadata = Map::new();
        metadata.insert("step".into(), Value::String(step.to_string()));
        metadata.insert("iteration".into(), json!(iteration));
        self.rag.add(&text, metadata);
    }

    fn build_report(&self, goal: &str, status: RunStatus, iterations: usize) -> String {
        let summary = self.context.get_planning_context();
        let summary = if summary.is_empty() {
            "No findings recorded.".to_string()
        } else {
            summary
        };
        let history: Vec<String> = self.history.iter().map(HistoryEvent::to_report_line).collect();

        format!(
            "# Exploration: {goal}\n\n\
             ## Metadata\n\
             - Status: {status}\n\
             - Timestamp: {}\n\
             - Iterations: {iterations}\n\n\
             ## Summary\n{summary}\n\n\
             ## Execution History\n{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            history.join("\n"),
        )
    }
}

fn execute_event(iteration: usize, step: &str, result: &ExecutionResult) -> HistoryEvent {
    let detail = if result.success {
        format!("Executed `{step}`: {}", result.detail)
    } else {
        format!(
            "Failed `{step}`: {}",
            result.error.as_deref().unwrap_or("unknown_error")
        )
    };
    let mut event = HistoryEvent::new(Phase::Execute, iteration, detail)
        .with_success(result.success)
        .with_metadata("step", json!(step));
    if let Some(error) = &result.error {
        event = event.with_metadata("error", json!(error));
    }
    event
}

/// 按 provider 创建 LLM；缺少 API Key 时回退到 Mock
pub fn create_llm(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let openai_key = std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "openai" if openai_key.is_some() => {
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.base_url.as_deref(), &model, openai_key.as_deref())
                    .with_timeout(cfg.timeouts.request),
            )
        }
        "deepseek" if deepseek_api_key().is_some() => {
            let client = match cfg.base_url.as_deref() {
                Some(base) => OpenAiClient::new(
                    Some(base),
                    cfg.model.as_deref().unwrap_or(crate::llm::DEEPSEEK_CHAT),
                    deepseek_api_key().as_deref(),
                ),
                None => create_deepseek_client(cfg.model.as_deref()),
            };
            tracing::info!("Using DeepSeek LLM");
            Arc::new(client.with_timeout(cfg.timeouts.request))
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 按配置组装完整的 Agent
pub fn build_agent(cfg: &AppConfig) -> Result<ExploreAgent, AgentError> {
    let workspace: PathBuf = match &cfg.tools.workspace_root {
        Some(root) => root.clone(),
        None => std::env::current_dir()
            .map_err(|e| AgentError::ConfigError(format!("cannot resolve workspace: {e}")))?,
    };
    if !workspace.is_dir() {
        return Err(AgentError::ConfigError(format!(
            "workspace is not a directory: {}",
            workspace.display()
        )));
    }

    let api = AgentApi::local(&workspace, cfg.tools.shell.timeout_secs);
    let executor = ActionExecutor::new(
        &api,
        &workspace,
        ExecutorSettings {
            tool_timeout_secs: cfg.tools.tool_timeout_secs,
            allowed_commands: cfg.tools.shell.allowed_commands.clone(),
        },
    );

    let llm = create_llm(&cfg.llm);
    let reasoning = LlmReasoningService::new(
        llm,
        &executor.registry().tool_descriptions(),
        cfg.agent.max_steps_per_plan,
    );
    let planner = Planner::new(Arc::new(reasoning));

    let mut rag = TempRagStore::new(
        select_embedder(&cfg.rag.embedding),
        cfg.rag.similarity_threshold,
        cfg.rag.max_entries,
    );
    if cfg.rag.sqlite.enabled {
        match SqliteRagBackend::open(&cfg.rag.sqlite.path) {
            Ok(backend) => rag = rag.with_backend(Box::new(backend)),
            Err(e) => {
                tracing::warn!(path = %cfg.rag.sqlite.path.display(), error = %e, "SQLite RAG backend unavailable, using memory only")
            }
        }
    }
    tracing::info!(workspace = %workspace.display(), rag_backend = rag.backend_kind(), "Agent assembled");

    Ok(ExploreAgent::new(
        planner,
        executor,
        rag,
        cfg.agent.clone(),
        cfg.context.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbedder;
    use crate::react::{PlanResponse, ScriptedReasoner};
    use crate::tools::ToolRegistry;

    fn agent_with(reasoner: ScriptedReasoner) -> ExploreAgent {
        let executor = ActionExecutor::from_registry(ToolRegistry::new(), 5);
        let rag = TempRagStore::new(Arc::new(HashEmbedder), 0.0, 10);
        ExploreAgent::new(
            Planner::new(Arc::new(reasoner)),
            executor,
            rag,
            AgentSection::default(),
            ContextSection::default(),
        )
    }

    #[tokio::test]
    async fn test_rejects_empty_and_disallowed_goals() {
        let mut agent = agent_with(ScriptedReasoner::default());
        assert!(matches!(agent.run("   ", 3).await, Err(AgentError::InvalidGoal(_))));
        assert!(matches!(
            agent.run("Help me EXPLOIT this server", 3).await,
            Err(AgentError::InvalidGoal(_))
        ));
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn test_planner_error_recorded_in_plan_event() {
        let mut agent = agent_with(ScriptedReasoner::default().then_error("service down"));
        let report = agent.run("map the codebase", 3).await.unwrap();

        assert!(report.contains("- Status: INCOMPLETE"));
        assert!(report.contains("No findings recorded."));
        let plan = agent
            .history()
            .iter()
            .find(|e| e.phase == Phase::Plan)
            .unwrap();
        assert!(plan.metadata["planner_error"]
            .as_str()
            .unwrap()
            .contains("service down"));
    }

    #[tokio::test]
    async fn test_only_first_step_executes_and_failures_continue() {
        let reasoner = ScriptedReasoner::new([
            PlanResponse::Text(r#"["semantic:filesystem_list", "semantic:shell_run:command=ls"]"#.into()),
            PlanResponse::Steps(vec![Step::invocation("missing_tool", "{}")]),
        ]);
        let mut agent = agent_with(reasoner);
        let report = agent.run("list things", 5).await.unwrap();

        let executes: Vec<&HistoryEvent> = agent
            .history()
            .iter()
            .filter(|e| e.phase == Phase::Execute)
            .collect();
        assert_eq!(executes.len(), 2);
        assert!(executes.iter().all(|e| !e.success));
        assert_eq!(executes[0].metadata["step"], "semantic:filesystem_list");
        assert_eq!(executes[1].metadata["error"], "unknown_tool");
        assert!(report.contains("- Status: INCOMPLETE"));
        assert!(report.contains("- Iterations: 3"));
        assert_eq!(agent.history().last().unwrap().phase, Phase::Complete);
    }

    #[test]
    fn test_create_llm_mock_provider() {
        let cfg = LlmSection {
            provider: "mock".to_string(),
            ..LlmSection::default()
        };
        let _llm = create_llm(&cfg);
    }
}
