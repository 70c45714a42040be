//! HTTP surface
//!
//! axum routes over the NLQ pipeline, plus `POST /api/query`, which exposes
//! the gateway in the wire format the remote backend consumes.

pub mod handler;
pub mod server;

pub use server::{router, HttpServer};
