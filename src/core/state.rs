//! 运行状态定义：阶段、历史事件、最终状态
//!
//! HistoryEvent 只追加不修改；完整序列即审计轨迹，也是最终报告的数据来源。

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// 单次运行中的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Plan,
    Execute,
    Synthesize,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Synthesize => "synthesize",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 历史事件
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub iteration: usize,
    pub detail: String,
    pub success: bool,
    pub metadata: Map<String, Value>,
}

impl HistoryEvent {
    pub fn new(phase: Phase, iteration: usize, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            iteration,
            detail: detail.into(),
            success: true,
            metadata: Map::new(),
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 报告中的一行：- `[时间]` **阶段**: 详情
    pub fn to_report_line(&self) -> String {
        format!(
            "- `[{}]` **{}**: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.phase,
            self.detail
        )
    }
}

/// 运行结束时的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    Incomplete,
}

impl RunStatus {
    /// 根据历史判定：至少执行过一步、全部成功、且最后一次规划没有返回新步骤时为 COMPLETED
    pub fn from_history(history: &[HistoryEvent]) -> Self {
        let mut executes = history.iter().filter(|e| e.phase == Phase::Execute).peekable();
        if executes.peek().is_none() {
            return RunStatus::Incomplete;
        }
        let all_success = executes.all(|e| e.success);

        let finished_naturally = history
            .iter()
            .rev()
            .find(|e| e.phase == Phase::Plan)
            .map(|e| {
                e.metadata
                    .get("steps")
                    .and_then(|s| s.as_array())
                    .map(|s| s.is_empty())
                    .unwrap_or(true)
            })
            .unwrap_or(false);

        if all_success && finished_naturally {
            RunStatus::Completed
        } else {
            RunStatus::Incomplete
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("COMPLETED"),
            RunStatus::Incomplete => f.write_str("INCOMPLETE"),
        }
    }
}
