//! HTTP API: routing, handlers, bearer auth, SSE projection

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;

pub use error::{ApiError, ApiResult};
pub use server::{build_router, run};
