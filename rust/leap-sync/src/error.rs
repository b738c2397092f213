use leap_lua::LuaError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("unlock of unlocked mutex")]
    NotLocked,
    #[error("negative WaitGroup counter")]
    NegativeCounter,
}

impl From<SyncError> for LuaError {
    fn from(err: SyncError) -> Self {
        LuaError::runtime(err.to_string())
    }
}
