//! Runner for Lua applications built on the `leap` module.

pub mod app;
pub mod config;
pub mod error;

pub use app::{init, resolve_app_dir, run};
pub use config::LeapConfig;
pub use error::AppError;
