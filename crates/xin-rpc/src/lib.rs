//! JSON-RPC surface for the kernel: info, node registry, consensus keys
//! and raw transaction submission.

pub mod api;
pub mod server;
pub mod types;

pub use server::RpcServer;
