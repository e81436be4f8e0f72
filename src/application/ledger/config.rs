use chrono::Duration;

use super::types::RewardRange;

pub const MINING_COOLDOWN_SECS: i64 = 3600;
pub const MINING_REWARD: RewardRange = RewardRange { min: 3, max: 3 };
pub const TASK_REWARD: RewardRange = RewardRange { min: 5, max: 10 };
pub const REFERRAL_BONUS: u64 = 3;
/// 0.05 USDT at the default rate.
pub const MIN_WITHDRAWAL_UNITS: u64 = 5;
/// 1 ZB = 0.01 USDT.
pub const UNITS_PER_USDT: u64 = 100;

#[derive(Clone, Debug)]
pub struct RewardConfig {
    pub mining_cooldown: Duration,
    pub mining_reward: RewardRange,
    pub task_reward: RewardRange,
    pub referral_bonus: u64,
    pub min_withdrawal: u64,
    pub units_per_usdt: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            mining_cooldown: Duration::seconds(MINING_COOLDOWN_SECS),
            mining_reward: MINING_REWARD,
            task_reward: TASK_REWARD,
            referral_bonus: REFERRAL_BONUS,
            min_withdrawal: MIN_WITHDRAWAL_UNITS,
            units_per_usdt: UNITS_PER_USDT,
        }
    }
}

impl RewardConfig {
    /// USDT amount string with cent precision, as the gateway expects it.
    pub fn units_to_usdt(&self, units: u64) -> String {
        format!("{:.2}", units as f64 / self.units_per_usdt as f64)
    }

    /// Parses a user-entered USDT amount into whole units. Accepts `5`, `0.5` and `0,5`.
    pub fn usdt_to_units(&self, input: &str) -> Option<u64> {
        let value: f64 = input.trim().replace(',', ".").parse().ok()?;
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        let units = (value * self.units_per_usdt as f64).round();
        (units >= 1.0 && units <= u64::MAX as f64).then_some(units as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usdt_conversion_rounds_to_whole_units() {
        let config = RewardConfig::default();
        assert_eq!(config.usdt_to_units("5"), Some(500));
        assert_eq!(config.usdt_to_units("0,29"), Some(29));
        assert_eq!(config.usdt_to_units("0.001"), None);
        assert_eq!(config.usdt_to_units("-1"), None);
        assert_eq!(config.usdt_to_units("abc"), None);
        assert_eq!(config.units_to_usdt(5), "0.05");
        assert_eq!(config.units_to_usdt(1234), "12.34");
    }
}
