//! Shared configuration, error types, and HMAC signing helpers used by
//! both the WebSocket gateway and the REST admin surface.

pub mod auth;
pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
