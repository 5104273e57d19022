//! 会话层：会话存储（内存 / JSON 文件）与记忆层挂钩

pub mod memory;
pub mod store;

pub use memory::{InMemoryMemory, MemoryService, NoopMemory};
pub use store::{
    create_session_store, Author, FileSessionStore, InMemorySessionStore, Session, SessionEvent,
    SessionStore,
};
