pub mod memory;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::LedgerStore;

use std::sync::Arc;

use crate::application::error::LedgerResult;

/// Opens the Redis store when a URL is configured, otherwise falls back to process memory.
pub async fn open_store(redis_url: Option<&str>) -> LedgerResult<Arc<dyn LedgerStore>> {
    match redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            log::info!("Ledger store: redis");
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("REDIS_URL not set, ledger store is in-memory and will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
