//! HTTP surface of the task-manager API.
//!
//! Routes plus the request security pipeline: error normalization,
//! bearer identification, audit, and rate limiting. The router is
//! composable: `api_router()` returns a `Router` that can be mounted on
//! any axum server instance.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use error::{ApiError, ErrorEnvelope};
pub use router::api_router;
pub use server::{start_server_on, ApiServer, ServerError};
pub use types::{ApiContext, Principal};
