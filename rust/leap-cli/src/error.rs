use leap_lua::LuaError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("app directory '{}': {message}", path.display())]
    AppDir { path: PathBuf, message: String },
    #[error("invalid config '{}': {message}", path.display())]
    Config { path: PathBuf, message: String },
    #[error("invalid log level '{0}' (expected trace, debug, info, warn or error)")]
    LogLevel(String),
    #[error("cannot write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Lua(#[from] LuaError),
}
