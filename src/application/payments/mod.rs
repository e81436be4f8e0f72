pub mod config;
pub mod types;
pub mod watcher;

pub use config::PaymentConfig;
pub use watcher::{DepositEvent, DepositWatcher, Notifier, PollReport};
