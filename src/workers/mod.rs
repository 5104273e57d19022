//! 专家层：注册表（封闭标识集合 + 别名解析）与 RPC 客户端（含响应净化）

pub mod registry;
pub mod rpc;
pub mod sanitize;

pub use registry::{WorkerId, WorkerRegistry};
pub use rpc::{HttpWorkerTransport, WorkerClient, WorkerError, WorkerTransport};
pub use sanitize::sanitize_reply;
