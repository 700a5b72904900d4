//! 推理服务契约：generate_plan(goal, context) -> PlanResponse
//!
//! - `LlmReasoningService`：拼规划 prompt 调用 LlmClient；输出中的 JSON Tool Call 解析为结构化调用
//! - `ScriptedReasoner`：按顺序返回预设响应，用于测试与演示

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::tools::{tool_call_schema_json, ToolCallFormat, ToolInvocation};

/// 一个待执行步骤：标记命令或结构化调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(String),
    Invocation(ToolInvocation),
}

impl Step {
    pub fn command(s: impl Into<String>) -> Self {
        Step::Command(s.into())
    }

    pub fn invocation(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Step::Invocation(ToolInvocation::new(name, arguments))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Command(c) => f.write_str(c),
            Step::Invocation(call) => write!(f, "{}({})", call.name, call.arguments),
        }
    }
}

/// 推理服务的响应形态
#[derive(Debug, Clone, PartialEq)]
pub enum PlanResponse {
    /// 已结构化的步骤列表（原样使用）
    Steps(Vec<Step>),
    /// 文本计划（由 Planner 解析）
    Text(String),
    /// 其它形态（转为字符串后解析）
    Other(Value),
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate_plan(&self, goal: &str, context: &str) -> Result<PlanResponse, AgentError>;
}

/// 从 LLM 输出中提取 JSON Tool Call（```json 代码块或首个 { 到末个 }）
pub fn extract_tool_call(output: &str) -> Option<ToolInvocation> {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end < start {
            return None;
        }
        &trimmed[start..=end]
    };

    let parsed: ToolCallFormat = serde_json::from_str(json_str).ok()?;
    if parsed.tool.trim().is_empty() {
        return None;
    }
    let arguments = serde_json::to_string(&parsed.args).ok()?;
    Some(ToolInvocation::new(parsed.tool, arguments))
}

/// 基于 LLM 的推理服务
pub struct LlmReasoningService {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmReasoningService {
    /// capabilities 为 (name, description)，通常来自 ToolRegistry::tool_descriptions
    pub fn new(llm: Arc<dyn LlmClient>, capabilities: &[(String, String)], max_steps: usize) -> Self {
        Self {
            llm,
            system_prompt: build_system_prompt(capabilities, max_steps),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

fn build_system_prompt(capabilities: &[(String, String)], max_steps: usize) -> String {
    let mut prompt = String::from(
        "You are a codebase exploration planner. Given a goal and the findings so far, \
         return the next steps needed to reach the goal.\n\n",
    );
    prompt.push_str("## Step format\n");
    prompt.push_str("Each step is a marker command:\n");
    prompt.push_str("- composite:<capability>:key=value:key=value  (analyze_directory, search_codebase)\n");
    prompt.push_str("- semantic:<capability>:key=value:key=value   (all other capabilities)\n");
    prompt.push_str("Keys: dir, pattern, type, file, content, path, command, regex, cs, analysis_type.\n");
    prompt.push_str(&format!(
        "Return at most {max_steps} steps as a JSON list of strings, e.g. \
         [\"composite:analyze_directory:dir=.:pattern=*.py\"].\n"
    ));
    prompt.push_str("Return an empty reply or [] when the goal is met.\n\n");

    prompt.push_str("Alternatively return exactly one structured call matching this JSON schema:\n");
    prompt.push_str(&tool_call_schema_json());
    prompt.push_str("\n\n## Available capabilities\n");
    for (name, description) in capabilities {
        prompt.push_str(&format!("- {name}: {description}\n"));
    }
    prompt
}

#[async_trait]
impl ReasoningService for LlmReasoningService {
    async fn generate_plan(&self, goal: &str, context: &str) -> Result<PlanResponse, AgentError> {
        let context = if context.is_empty() {
            "(no steps executed yet)"
        } else {
            context
        };
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!("Goal:\n{goal}\n\nContext:\n{context}")),
        ];
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;
        let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
        tracing::debug!(
            chars = output.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "LLM plan received"
        );

        Ok(match extract_tool_call(&output) {
            Some(call) => PlanResponse::Steps(vec![Step::Invocation(call)]),
            None => PlanResponse::Text(output),
        })
    }
}

/// 预设响应的推理服务；用尽后返回空计划
#[derive(Default)]
pub struct ScriptedReasoner {
    responses: Mutex<VecDeque<Result<PlanResponse, String>>>,
    contexts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new(responses: impl IntoIterator<Item = PlanResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// 追加一次失败响应
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.into()));
        self
    }

    pub fn then(self, response: PlanResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(response));
        self
    }

    /// 每次调用时收到的 context
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn generate_plan(&self, _goal: &str, context: &str) -> Result<PlanResponse, AgentError> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(context.to_string());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(AgentError::LlmError(message)),
            None => Ok(PlanResponse::Steps(Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_step_display() {
        assert_eq!(Step::command("semantic:filesystem_list").to_string(), "semantic:filesystem_list");
        assert_eq!(
            Step::invocation("search_content", r#"{"pattern":"TODO"}"#).to_string(),
            r#"search_content({"pattern":"TODO"})"#
        );
    }

    #[test]
    fn test_extract_tool_call() {
        let call = extract_tool_call(
            "I will search.\n```json\n{\"tool\": \"search_content\", \"args\": {\"pattern\": \"TODO\"}}\n```",
        )
        .unwrap();
        assert_eq!(call.name, "search_content");
        let args: Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(args["pattern"], "TODO");

        assert!(extract_tool_call("[\"semantic:filesystem_list\"]").is_none());
        assert!(extract_tool_call("{\"tool\": \"\"}").is_none());
        assert!(extract_tool_call("{not json}").is_none());
    }

    #[tokio::test]
    async fn test_llm_service_prompt_and_text() {
        let caps = vec![("filesystem_list".to_string(), "List a directory".to_string())];
        let service = LlmReasoningService::new(Arc::new(MockLlmClient), &caps, 5);
        assert!(service.system_prompt().contains("- filesystem_list: List a directory"));
        assert!(service.system_prompt().contains("composite:"));

        let response = service.generate_plan("map the repo", "").await.unwrap();
        assert!(matches!(response, PlanResponse::Text(ref t) if t.contains("analyze_directory")));
    }

    #[tokio::test]
    async fn test_scripted_reasoner_sequence() {
        let reasoner = ScriptedReasoner::new([PlanResponse::Text("a".into())]).then_error("down");
        assert_eq!(
            reasoner.generate_plan("g", "c1").await.unwrap(),
            PlanResponse::Text("a".into())
        );
        assert!(reasoner.generate_plan("g", "c2").await.is_err());
        assert_eq!(
            reasoner.generate_plan("g", "c3").await.unwrap(),
            PlanResponse::Steps(vec![])
        );
        assert_eq!(reasoner.contexts(), vec!["c1", "c2", "c3"]);
    }
}
