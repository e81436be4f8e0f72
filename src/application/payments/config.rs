use std::time::Duration;

pub const CRYPTO_PAY_API_URL: &str = "https://pay.crypt.bot/api/";
pub const DEFAULT_ASSET: &str = "USDT";
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_POLL_ATTEMPTS: u32 = 30;
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_TRACKED_INVOICES: usize = 10_000;

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub api_url: String,
    pub token: String,
    pub asset: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub max_tracked: usize,
}
