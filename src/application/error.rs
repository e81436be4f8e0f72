use chrono::Duration;
use thiserror::Error;

use crate::infrastructure::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },
    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },
    #[error("task {task_id} already completed by user {user_id}")]
    AlreadyCompleted { user_id: i64, task_id: u32 },
    #[error("a proof for task {task_id} is already awaiting review")]
    AlreadyPending { task_id: u32 },
    #[error("{0} has already been resolved")]
    AlreadyResolved(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("task {0} is closed")]
    TaskClosed(u32),
    #[error("mining is on cooldown for another {}s", .remaining.num_seconds())]
    Cooldown { remaining: Duration },
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("user {0} is not allowed to perform this action")]
    Unauthorized(i64),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn user_not_found(user_id: i64) -> Self {
        LedgerError::NotFound(format!("user {}", user_id))
    }

    pub fn task_not_found(task_id: u32) -> Self {
        LedgerError::NotFound(format!("task {}", task_id))
    }

    /// Whether the failed step can be retried with corrected input.
    pub fn is_retryable_input(&self) -> bool {
        matches!(self, LedgerError::InvalidInput(_))
    }
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(format!("corrupt record: {}", err))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
