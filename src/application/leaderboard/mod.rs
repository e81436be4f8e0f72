use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::error::LedgerResult;
use crate::application::ledger::types::{User, UserId};
use crate::infrastructure::database::LedgerStore;

pub const TOP_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    Week,
    Month,
}

impl Period {
    pub fn span(&self) -> Duration {
        match self {
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Board {
    Referrals,
    Tasks,
}

impl Board {
    pub fn label(&self) -> &'static str {
        match self {
            Board::Referrals => "referrals",
            Board::Tasks => "tasks",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "referrals" => Some(Board::Referrals),
            "tasks" => Some(Board::Tasks),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub username: Option<String>,
    pub count: usize,
}

pub struct Leaderboards {
    store: Arc<dyn LedgerStore>,
}

impl Leaderboards {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn top(
        &self,
        board: Board,
        period: Period,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<LeaderboardEntry>> {
        let users: Vec<User> = self.store.list_users().await?.try_collect().await?;
        let since = now - period.span();
        Ok(match board {
            Board::Referrals => top_referrers(&users, since),
            Board::Tasks => top_performers(&users, since),
        })
    }
}

/// Referrers ranked by referred users who registered at or after `since`.
pub fn top_referrers(users: &[User], since: DateTime<Utc>) -> Vec<LeaderboardEntry> {
    let registered: HashMap<UserId, DateTime<Utc>> = users
        .iter()
        .map(|user| (user.id, user.registered_at))
        .collect();
    rank(users, |user| {
        user.referrals
            .iter()
            .filter(|id| registered.get(id).is_some_and(|at| *at >= since))
            .count()
    })
}

/// Users ranked by task completions recorded at or after `since`.
pub fn top_performers(users: &[User], since: DateTime<Utc>) -> Vec<LeaderboardEntry> {
    rank(users, |user| {
        user.completed_tasks
            .values()
            .filter(|at| **at >= since)
            .count()
    })
}

fn rank(users: &[User], score: impl Fn(&User) -> usize) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = users
        .iter()
        .filter_map(|user| {
            let count = score(user);
            (count > 0).then(|| LeaderboardEntry {
                user_id: user.id,
                username: user.username.clone(),
                count,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.user_id.cmp(&b.user_id)));
    entries.truncate(TOP_SIZE);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, registered_at: DateTime<Utc>) -> User {
        User::new(id, Some(format!("user{}", id)), registered_at)
    }

    #[test]
    fn referrals_count_only_recent_signups() {
        let now = Utc::now();
        let mut referrer = user(1, now - Duration::days(60));
        referrer.referrals = vec![2, 3, 4];
        let users = vec![
            referrer,
            user(2, now - Duration::days(2)),
            user(3, now - Duration::days(20)),
            user(4, now - Duration::days(40)),
        ];

        let week = top_referrers(&users, now - Period::Week.span());
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].count, 1);
        let month = top_referrers(&users, now - Period::Month.span());
        assert_eq!(month[0].count, 2);
    }

    #[test]
    fn performers_are_ranked_and_capped_at_ten() {
        let now = Utc::now();
        let users: Vec<User> = (1..=12)
            .map(|id| {
                let mut u = user(id, now);
                for task in 0..id as u32 {
                    u.completed_tasks.insert(task, now - Duration::days(1));
                }
                u.completed_tasks.insert(99, now - Duration::days(10));
                u
            })
            .collect();

        let top = top_performers(&users, now - Period::Week.span());
        assert_eq!(top.len(), TOP_SIZE);
        assert_eq!(top[0].user_id, 12);
        assert_eq!(top[0].count, 12);
        assert_eq!(top[9].user_id, 3);
    }

    #[test]
    fn empty_board_when_nothing_happened() {
        let now = Utc::now();
        assert!(top_performers(&[user(1, now)], now - Duration::days(7)).is_empty());
        assert_eq!(Period::parse("month"), Some(Period::Month));
        assert_eq!(Board::parse("nope"), None);
    }
}
