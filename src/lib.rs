pub mod auth;
pub mod backend;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod hacker_code;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod upstream;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use handlers::{AppState, SharedState};
pub use rate_limiter::RateLimiter;
pub use server::create_app;
