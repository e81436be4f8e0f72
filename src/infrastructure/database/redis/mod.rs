pub mod client;
pub mod commands;
pub mod store;

pub use store::RedisStore;
