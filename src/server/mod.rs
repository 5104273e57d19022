//! HTTP 入口层：路由、请求/响应类型与依赖装配

pub mod routes;

pub use routes::{build_state, create_router, AppState, ChatRequest, ChatResponse};
