//! 调度层：审批门控规则与单轮调度引擎

pub mod engine;
pub mod gate;

pub use engine::{DispatchEngine, TurnOutcome, WorkerResult};
