//! Hive - Rust 企业智能体编排网关
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文拼装（有界窗口 + 噪声过滤）
//! - **core**: 退避策略、审批台账、调用指标、错误类型
//! - **dispatch**: 调度引擎（单轮状态机：审批短路、计划执行、结果合并）
//! - **intent**: 意图分类与调度计划解析（含 JSON 修复）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **server**: HTTP 入口（POST /chat、指标、健康检查）
//! - **session**: 会话存储与记忆层挂钩
//! - **workers**: 专家 Agent 注册表与 RPC 客户端（含响应净化）

pub mod config;
pub mod context;
pub mod core;
pub mod dispatch;
pub mod intent;
pub mod llm;
pub mod server;
pub mod session;
pub mod workers;
