//! Ledgerhook API Library
//!
//! HTTP surface for Stripe webhook delivery and card payment confirmation.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
