pub mod admin;
pub mod approvals;
pub mod config;
pub mod error;
pub mod export;
pub mod health;
pub mod leaderboard;
pub mod ledger;
pub mod payments;
pub mod services;
pub mod tasks;

pub use config::AppConfig;
pub use error::{LedgerError, LedgerResult};
pub use services::Services;
