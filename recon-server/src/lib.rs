//! HTTP boundary of the recon scan platform: REST control surface plus
//! the SSE progress stream, on top of [`recon_core`].

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use state::{AppState, service_config};
