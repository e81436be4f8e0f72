use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type UserId = i64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub last_mined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub referrals: Vec<UserId>,
    #[serde(default)]
    pub referrer_id: Option<UserId>,
    #[serde(default)]
    pub completed_tasks: BTreeMap<u32, DateTime<Utc>>,
    #[serde(default)]
    pub blocked: bool,
}

impl User {
    pub fn new(id: UserId, username: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username,
            registered_at: now,
            balance: 0,
            last_mined_at: None,
            referrals: Vec::new(),
            referrer_id: None,
            completed_tasks: BTreeMap::new(),
            blocked: false,
        }
    }

    pub fn username_display(&self) -> &str {
        self.username
            .as_deref()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or("—")
    }
}

/// Inclusive reward range; a fixed reward has `min == max`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardRange {
    pub min: u64,
    pub max: u64,
}

impl RewardRange {
    pub fn fixed(amount: u64) -> Self {
        Self {
            min: amount,
            max: amount,
        }
    }

    pub fn new(min: u64, max: u64) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    /// Accepts `7` or `5-10`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        match input.split_once('-') {
            Some((lo, hi)) => {
                let min = lo.trim().parse().ok()?;
                let max = hi.trim().parse().ok()?;
                Self::new(min, max)
            }
            None => input.parse().ok().map(Self::fixed),
        }
    }

    pub fn draw(&self) -> u64 {
        if self.min == self.max {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }
}

impl std::fmt::Display for RewardRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub user: User,
    pub created: bool,
    /// Referrer credited for this registration, with the bonus paid.
    pub referral_bonus: Option<(UserId, u64)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MiningClaim {
    pub reward: u64,
    pub balance: u64,
    pub next_claim_at: DateTime<Utc>,
}
