//! Transport Layer (§6.1, §4.1): terminates JSON-RPC 2.0 over HTTP,
//! validates the envelope, and dispatches to the Task Registry / Control
//! Plane API. Adapted from the source codebase's Axum HTTP API layer
//! (`api::server`), generalized from its REST route table to a single
//! JSON-RPC endpoint.

pub mod dispatch;
pub mod jsonrpc;
pub mod middleware;
pub mod server;

pub use server::{serve, ServerHandle};
