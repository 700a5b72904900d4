//! Mock LLM 客户端（用于本地演示与测试，无需 API）
//!
//! 首轮返回一条目录分析的组合命令；提示中出现已执行步骤后返回空回复，规划随之结束。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 首轮返回的命令
pub const MOCK_FIRST_STEP: &str = "composite:analyze_directory:dir=.:pattern=*.py";

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if last_user.contains("Steps executed:") {
            Ok(String::new())
        } else {
            Ok(format!("[\"{}\"]", MOCK_FIRST_STEP))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_stops_after_first_step() {
        let llm = MockLlmClient;
        let first = llm.complete(&[Message::user("Goal: map")]).await.unwrap();
        assert!(first.contains(MOCK_FIRST_STEP));

        let second = llm
            .complete(&[Message::user("Steps executed: 1 (✓ 1, ✗ 0)")])
            .await
            .unwrap();
        assert!(second.is_empty());
    }
}
