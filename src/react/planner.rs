//! Planner：调用推理服务并把响应归一化为步骤列表
//!
//! 文本计划按顺序尝试：列表字面量（JSON 或单引号字符串）→ 编号列表 `1. step` → 非空行。
//! 推理服务失败时返回空列表并带上错误信息，由 Agent 记入历史。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use super::reasoning::{PlanResponse, ReasoningService, Step};

/// 一次规划的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub steps: Vec<Step>,
    /// 推理服务出错时的错误信息（此时 steps 为空）
    pub error: Option<String>,
}

/// Planner：持有推理服务
pub struct Planner {
    service: Arc<dyn ReasoningService>,
}

impl Planner {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    /// 生成下一批步骤，最多 max_steps 条
    pub async fn plan(&self, goal: &str, context: &str, max_steps: usize) -> PlanOutcome {
        let response = match self.service.generate_plan(goal, context).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Error during planning");
                return PlanOutcome {
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut steps = match response {
            PlanResponse::Steps(steps) => steps
                .into_iter()
                .filter(|s| !matches!(s, Step::Command(c) if c.trim().is_empty()))
                .collect(),
            PlanResponse::Text(text) => commands(parse_plan_string(&text)),
            PlanResponse::Other(value) => {
                tracing::warn!(value = %value, "Unexpected plan type from reasoning service, converting to string");
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                commands(parse_plan_string(&text))
            }
        };

        if steps.is_empty() {
            tracing::info!("LLM returned no new steps, assuming goal is met.");
        } else if steps.len() > max_steps {
            tracing::debug!(planned = steps.len(), max_steps, "Plan truncated");
            steps.truncate(max_steps);
        }

        PlanOutcome { steps, error: None }
    }

    /// 只要步骤；错误已在日志中
    pub async fn get_next_steps(&self, goal: &str, context: &str, max_steps: usize) -> Vec<Step> {
        self.plan(goal, context, max_steps).await.steps
    }
}

fn commands(lines: Vec<String>) -> Vec<Step> {
    lines.into_iter().map(Step::Command).collect()
}

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\s+(.+)$").unwrap())
}

/// 把文本计划解析为步骤字符串
pub fn parse_plan_string(plan: &str) -> Vec<String> {
    let plan = plan.trim();
    if plan.is_empty() {
        return Vec::new();
    }

    if plan.starts_with('[') && plan.ends_with(']') {
        match parse_list_literal(plan) {
            Some(items) => {
                return items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            None => tracing::warn!(plan = %plan, "Plan looks like a list but could not be parsed"),
        }
    }

    let numbered: Vec<String> = plan
        .lines()
        .filter_map(|line| {
            numbered_re()
                .captures(line.trim())
                .map(|c| c[1].trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    let lines: Vec<String> = plan
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        vec![plan.to_string()]
    } else {
        lines
    }
}

/// 列表字面量：先按 JSON 数组，再按单/双引号字符串列表
fn parse_list_literal(s: &str) -> Option<Vec<String>> {
    if let Ok(items) = serde_json::from_str::<Vec<Value>>(s) {
        return Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null | Value::Bool(false) => None,
                    other => Some(other.to_string()),
                })
                .collect(),
        );
    }
    parse_quoted_list(s)
}

/// 解析 `['a', "b", 'c\'d']`；仅支持字符串元素
fn parse_quoted_list(s: &str) -> Option<Vec<String>> {
    let inner = s.strip_prefix('[')?.strip_suffix(']')?;
    let mut chars = inner.chars().peekable();
    let mut items = Vec::new();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return None;
        }

        let mut item = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next()? {
                    'n' => item.push('\n'),
                    't' => item.push('\t'),
                    other => item.push(other),
                },
                c if c == quote => {
                    closed = true;
                    break;
                }
                c => item.push(c),
            }
        }
        if !closed {
            return None;
        }
        items.push(item);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return None,
        }
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::reasoning::ScriptedReasoner;

    #[test]
    fn test_parse_json_list() {
        assert_eq!(
            parse_plan_string(r#"["semantic:filesystem_list:path=.", "  ", "composite:analyze_directory"]"#),
            vec!["semantic:filesystem_list:path=.", "composite:analyze_directory"]
        );
        assert!(parse_plan_string("[]").is_empty());
        assert!(parse_plan_string("   ").is_empty());
    }

    #[test]
    fn test_parse_single_quoted_list() {
        assert_eq!(
            parse_plan_string(r"['semantic:search_content:pattern=it\'s', 'semantic:filesystem_read:path=a.py',]"),
            vec!["semantic:search_content:pattern=it's", "semantic:filesystem_read:path=a.py"]
        );
    }

    #[test]
    fn test_parse_numbered_and_lines() {
        let numbered = "Plan:\n1. semantic:filesystem_list\n2.  composite:analyze_directory:dir=src\n";
        assert_eq!(
            parse_plan_string(numbered),
            vec!["semantic:filesystem_list", "composite:analyze_directory:dir=src"]
        );

        let lines = "semantic:filesystem_list\n\n  semantic:filesystem_read:path=a.py  ";
        assert_eq!(
            parse_plan_string(lines),
            vec!["semantic:filesystem_list", "semantic:filesystem_read:path=a.py"]
        );
    }

    #[test]
    fn test_unparseable_list_falls_back_to_lines() {
        assert_eq!(parse_plan_string("[not, a list]"), vec!["[not, a list]"]);
    }

    #[tokio::test]
    async fn test_plan_caps_steps_and_reports_errors() {
        let reasoner = ScriptedReasoner::new([PlanResponse::Text(
            r#"["a", "b", "c", "d"]"#.to_string(),
        )])
        .then_error("service down")
        .then(PlanResponse::Other(serde_json::json!(42)));
        let planner = Planner::new(Arc::new(reasoner));

        let first = planner.plan("goal", "", 2).await;
        assert_eq!(first.steps, vec![Step::command("a"), Step::command("b")]);
        assert!(first.error.is_none());

        let second = planner.plan("goal", "", 2).await;
        assert!(second.steps.is_empty());
        assert!(second.error.unwrap().contains("service down"));

        assert_eq!(planner.get_next_steps("goal", "", 2).await, vec![Step::command("42")]);
        assert!(planner.get_next_steps("goal", "", 2).await.is_empty());
    }
}
