//! 认知层：推理服务、Planner、上下文管理

pub mod context;
pub mod planner;
pub mod reasoning;

pub use context::{summarize, ContextManager};
pub use planner::{parse_plan_string, PlanOutcome, Planner};
pub use reasoning::{
    extract_tool_call, LlmReasoningService, PlanResponse, ReasoningService, ScriptedReasoner, Step,
};
