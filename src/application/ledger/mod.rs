pub mod config;
pub mod engine;
pub mod types;

pub use config::RewardConfig;
pub use engine::LedgerEngine;
