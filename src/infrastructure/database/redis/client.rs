use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};

/// Opens a multiplexed connection and checks the server answers before the bot starts.
pub async fn connect(redis_url: &str) -> RedisResult<MultiplexedConnection> {
    let client = Client::open(redis_url)?;
    let mut con = client.get_multiplexed_async_connection().await?;
    let pong: String = redis::cmd("PING").query_async(&mut con).await?;
    log::debug!("redis answered {}", pong);
    Ok(con)
}
