//! 上下文层：从会话存储拼装有界的对话前情

pub mod assembler;

pub use assembler::ContextAssembler;
