//! 上下文管理：把每步执行结果压缩成一行摘要，拼成下一轮规划的上下文
//!
//! 上下文 = 统计行 + 空行 + 摘要按行拼接；超过字符上限时淘汰最旧摘要，至少保留 min_retained 条。

use std::collections::VecDeque;

use serde_json::Value;

use crate::tools::ExecutionResult;

/// 数据摘要中列表/文件名的展示上限
const SAMPLE_ITEMS: usize = 20;
/// 全部为对象的小列表直接展开
const SMALL_OBJECT_LIST: usize = 10;
const MAX_OBJECT_JSON: usize = 2_000;
const MAX_STRING_DATA: usize = 10_000;

pub struct ContextManager {
    entries: VecDeque<String>,
    max_chars: usize,
    min_retained: usize,
    total_steps: usize,
    successful_steps: usize,
    failed_steps: usize,
}

impl ContextManager {
    pub fn new(max_chars: usize, min_retained: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_chars,
            min_retained,
            total_steps: 0,
            successful_steps: 0,
            failed_steps: 0,
        }
    }

    /// 清空摘要与计数
    pub fn reset(&mut self) {
        self.entries.clear();
        self.total_steps = 0;
        self.successful_steps = 0;
        self.failed_steps = 0;
    }

    /// 记录一步结果，返回该步摘要
    pub fn update_context(&mut self, step: &str, result: &ExecutionResult) -> String {
        self.total_steps += 1;
        if result.success {
            self.successful_steps += 1;
        } else {
            self.failed_steps += 1;
        }

        let summary = summarize(step, result);
        self.entries.push_back(summary.clone());

        let mut current = self.context_len();
        while current > self.max_chars && self.entries.len() > self.min_retained {
            tracing::warn!(
                length = current,
                max_chars = self.max_chars,
                "Context exceeds limit, evicting oldest entry"
            );
            self.entries.pop_front();
            current = self.context_len();
        }
        summary
    }

    pub fn get_planning_context(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let lines: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        format!("{}\n\n{}", self.stats_line(), lines.join("\n"))
    }

    fn context_len(&self) -> usize {
        self.get_planning_context().chars().count()
    }

    fn stats_line(&self) -> String {
        format!(
            "Steps executed: {} (✓ {}, ✗ {})",
            self.total_steps, self.successful_steps, self.failed_steps
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn successful_steps(&self) -> usize {
        self.successful_steps
    }

    pub fn failed_steps(&self) -> usize {
        self.failed_steps
    }
}

/// 单步摘要
///
/// - 成功：Executed: `step` -> detail + 数据摘要
/// - 失败：Failed: `step` -> Error: tag. Detail: detail
pub fn summarize(step: &str, result: &ExecutionResult) -> String {
    if result.success {
        let detail = if result.detail.is_empty() {
            "Step executed successfully."
        } else {
            result.detail.as_str()
        };
        let data = result.data.as_ref().map(summarize_data).unwrap_or_default();
        format!("Executed: `{step}` -> {detail}{data}")
    } else {
        let error = result.error.as_deref().unwrap_or("unknown_error");
        let detail = if result.detail.is_empty() {
            "Step failed."
        } else {
            result.detail.as_str()
        };
        format!("Failed: `{step}` -> Error: {error}. Detail: {detail}")
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn first_items(items: &[Value]) -> Value {
    Value::Array(items.iter().take(SAMPLE_ITEMS).cloned().collect())
}

fn summarize_data(data: &Value) -> String {
    match data {
        Value::Array(items) => {
            if items.len() <= SMALL_OBJECT_LIST && items.iter().all(Value::is_object) {
                format!("\n{}", pretty(data))
            } else if items.len() > SAMPLE_ITEMS {
                format!(
                    " (showing first {SAMPLE_ITEMS}/{})\n{}",
                    items.len(),
                    pretty(&first_items(items))
                )
            } else {
                format!("\n{}", pretty(data))
            }
        }
        Value::Object(map) => {
            if let Some(Value::Array(files)) = map.get("matching_files") {
                format!(
                    "\nMatching files ({} total):\n{}",
                    files.len(),
                    pretty(&first_items(files))
                )
            } else if let Some(Value::Array(files)) = map.get("files") {
                format!(
                    "\nFiles found ({} total):\n{}",
                    files.len(),
                    pretty(&first_items(files))
                )
            } else {
                let json = pretty(data);
                if json.chars().count() < MAX_OBJECT_JSON {
                    format!("\n{json}")
                } else {
                    format!(" ({} keys, truncated)", map.len())
                }
            }
        }
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_DATA {
                let head: String = s.chars().take(MAX_STRING_DATA).collect();
                format!("\nData: {head}... (truncated)")
            } else {
                format!("\nData: {s}")
            }
        }
        _ => String::new(),
    }
}
