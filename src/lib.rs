//! explore-agent - 目标驱动的代码库探索 Agent
//!
//! 模块划分：
//! - **agent**: 探索主循环（规划 → 执行 → 汇总）与组件装配
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、历史事件与运行状态
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入提供方
//! - **memory**: 单次运行内的临时向量记忆
//! - **react**: 推理服务契约、Planner、上下文管理
//! - **tools**: 命令解析、能力注册表与执行器、各能力实现

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{build_agent, create_llm, ExploreAgent};
pub use config::{load_config, AppConfig};
