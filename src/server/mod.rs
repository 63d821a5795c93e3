//! HTTP server exposing an entity store.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`streaming`]: SSE streaming of store change events

pub mod api;
pub mod streaming;
