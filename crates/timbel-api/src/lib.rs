//! HTTP/WebSocket API server for Timbel.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use response::ApiResponse;
pub use routes::{build_app, create_router};
pub use state::AppState;
