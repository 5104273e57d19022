//! 意图层：调度计划类型、分类器输出修复与 Intent Planner

pub mod parse;
pub mod plan;
pub mod planner;

pub use plan::{AgentTask, CoordinationMode, DispatchPlan, RawAgentIntent, RawIntentClassification};
pub use planner::IntentPlanner;
