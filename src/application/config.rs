use anyhow::{Context, Result, anyhow};
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::ledger::config::RewardConfig;
use super::ledger::types::RewardRange;
use super::payments::config::{self as payment_defaults, PaymentConfig};

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bot_token: String,
    pub admin_ids: HashSet<i64>,
    pub redis_url: Option<String>,
    pub port: u16,
    pub rewards: RewardConfig,
    pub payments: PaymentConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = env_first(&["TELOXIDE_TOKEN", "TELEGRAM_BOT_API_TOKEN"])
            .ok_or_else(|| anyhow!("TELOXIDE_TOKEN must be set"))?;
        let payment_token = env_first(&["CRYPTO_PAY_TOKEN", "CRYPTO_BOT_API_TOKEN"])
            .ok_or_else(|| anyhow!("CRYPTO_PAY_TOKEN must be set"))?;

        let admin_ids = match env::var("ADMIN_IDS") {
            Ok(raw) => parse_admin_ids(&raw)?,
            Err(_) => HashSet::new(),
        };
        if admin_ids.is_empty() {
            log::warn!("ADMIN_IDS is empty, admin panel and proof review are unreachable");
        }

        let defaults = RewardConfig::default();
        let rewards = RewardConfig {
            mining_cooldown: ChronoDuration::seconds(env_or(
                "MINING_COOLDOWN_SECS",
                defaults.mining_cooldown.num_seconds(),
            )?),
            mining_reward: env_range("MINING_REWARD", defaults.mining_reward)?,
            task_reward: env_range("TASK_REWARD", defaults.task_reward)?,
            referral_bonus: env_or("REFERRAL_BONUS", defaults.referral_bonus)?,
            min_withdrawal: env_or("MIN_WITHDRAWAL_ZB", defaults.min_withdrawal)?,
            units_per_usdt: env_or("ZB_PER_USDT", defaults.units_per_usdt)?,
        };
        if rewards.units_per_usdt == 0 {
            return Err(anyhow!("ZB_PER_USDT must be positive"));
        }

        let payments = PaymentConfig {
            api_url: env::var("CRYPTO_PAY_API_URL")
                .unwrap_or_else(|_| payment_defaults::CRYPTO_PAY_API_URL.to_string()),
            token: payment_token,
            asset: env::var("CRYPTO_PAY_ASSET")
                .unwrap_or_else(|_| payment_defaults::DEFAULT_ASSET.to_string()),
            poll_interval: Duration::from_secs(env_or(
                "DEPOSIT_POLL_INTERVAL_SECS",
                payment_defaults::POLL_INTERVAL.as_secs(),
            )?),
            max_attempts: env_or("DEPOSIT_MAX_ATTEMPTS", payment_defaults::MAX_POLL_ATTEMPTS)?,
            timeout: Duration::from_secs(env_or(
                "GATEWAY_TIMEOUT_SECS",
                payment_defaults::GATEWAY_TIMEOUT.as_secs(),
            )?),
            max_tracked: payment_defaults::MAX_TRACKED_INVOICES,
        };

        Ok(Self {
            bot_token,
            admin_ids,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            port: env_or("PORT", DEFAULT_PORT)?,
            rewards,
            payments,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_range(key: &str, default: RewardRange) -> Result<RewardRange> {
    match env::var(key) {
        Ok(raw) => RewardRange::parse(&raw)
            .ok_or_else(|| anyhow!("{} must be N or MIN-MAX, got '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

pub fn parse_admin_ids(raw: &str) -> Result<HashSet<i64>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("ADMIN_IDS contains a non-numeric id '{}'", part))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_ids_accept_commas_and_spaces() {
        let ids = parse_admin_ids("1041720539, 6216901034 42").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&42));
        assert!(parse_admin_ids("12,abc").is_err());
        assert!(parse_admin_ids("").unwrap().is_empty());
    }
}
