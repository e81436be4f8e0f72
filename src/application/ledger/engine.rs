use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::config::RewardConfig;
use super::types::{MiningClaim, Registration, User, UserId};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::payments::types::DepositInvoice;
use crate::application::tasks::types::Task;
use crate::infrastructure::database::LedgerStore;

/// Per-user async locks serializing read-check-write sequences (cooldown check then credit).
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }
}

/// Time left before the next claim, or `None` when a claim is allowed at `now`.
pub fn cooldown_remaining(
    last_mined_at: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = last_mined_at?;
    let elapsed = now - last;
    (elapsed < cooldown).then(|| cooldown - elapsed)
}

/// The only component that mutates balances.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    config: RewardConfig,
    locks: UserLocks,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, config: RewardConfig) -> Self {
        Self {
            store,
            config,
            locks: UserLocks::default(),
        }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub async fn user(&self, user_id: UserId) -> LedgerResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::user_not_found(user_id))
    }

    /// First contact. The referrer is linked and paid only for a brand-new user, and only when
    /// the referrer exists and is not the user itself.
    pub async fn register(
        &self,
        user_id: UserId,
        username: Option<String>,
        referrer: Option<UserId>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Registration> {
        if let Some(mut existing) = self.store.get_user(user_id).await? {
            if let Some(name) = username.filter(|name| existing.username.as_deref() != Some(name.as_str())) {
                self.store.set_username(user_id, &name).await?;
                existing.username = Some(name);
            }
            return Ok(Registration {
                user: existing,
                created: false,
                referral_bonus: None,
            });
        }

        let referrer = match referrer.filter(|id| *id != user_id) {
            Some(id) if self.store.get_user(id).await?.is_some() => Some(id),
            _ => None,
        };

        let mut user = User::new(user_id, username, now);
        user.referrer_id = referrer;
        if !self.store.insert_user_if_absent(&user).await? {
            // Lost a first-contact race; the winner handled the referral.
            return Ok(Registration {
                user: self.user(user_id).await?,
                created: false,
                referral_bonus: None,
            });
        }
        log::info!("registered user_id={} referrer={:?}", user_id, referrer);

        let mut referral_bonus = None;
        if let Some(referrer_id) = referrer {
            if self.store.add_referral(referrer_id, user_id).await? {
                let bonus = self.config.referral_bonus;
                let _guard = self.locks.lock(referrer_id).await;
                let balance = self.store.adjust_balance(referrer_id, bonus as i64).await?;
                log::info!(
                    "referral bonus user_id={} referred={} +{} balance={}",
                    referrer_id,
                    user_id,
                    bonus,
                    balance
                );
                referral_bonus = Some((referrer_id, bonus));
            }
        }

        Ok(Registration {
            user,
            created: true,
            referral_bonus,
        })
    }

    pub async fn claim_mining(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<MiningClaim> {
        let _guard = self.locks.lock(user_id).await;
        let user = self.user(user_id).await?;
        if let Some(remaining) =
            cooldown_remaining(user.last_mined_at, self.config.mining_cooldown, now)
        {
            return Err(LedgerError::Cooldown { remaining });
        }

        let reward = self.config.mining_reward.draw();
        // Stamp first: a failed credit costs one claim, never pays twice.
        self.store.set_last_mined(user_id, now).await?;
        let balance = self.store.adjust_balance(user_id, reward as i64).await?;
        log::info!("mining user_id={} +{} balance={}", user_id, reward, balance);
        Ok(MiningClaim {
            reward,
            balance,
            next_claim_at: now + self.config.mining_cooldown,
        })
    }

    /// Credits a task reward. Callers must have won the completion write first.
    pub async fn credit_task_reward(&self, user_id: UserId, task: &Task) -> LedgerResult<(u64, u64)> {
        let reward = task.reward.draw();
        let _guard = self.locks.lock(user_id).await;
        let balance = self.store.adjust_balance(user_id, reward as i64).await?;
        log::info!(
            "task reward user_id={} task={} +{} balance={}",
            user_id,
            task.id,
            reward,
            balance
        );
        Ok((reward, balance))
    }

    /// Validates and debits a withdrawal amount.
    pub async fn debit_withdrawal(&self, user_id: UserId, amount: u64) -> LedgerResult<u64> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        if amount < self.config.min_withdrawal {
            return Err(LedgerError::BelowMinimum {
                amount,
                minimum: self.config.min_withdrawal,
            });
        }
        let delta = i64::try_from(amount)
            .map_err(|_| LedgerError::InvalidInput("amount too large".to_string()))?;
        let _guard = self.locks.lock(user_id).await;
        let balance = self.store.adjust_balance(user_id, -delta).await?;
        log::info!("withdrawal debit user_id={} -{} balance={}", user_id, amount, balance);
        Ok(balance)
    }

    pub async fn refund_withdrawal(&self, user_id: UserId, amount: u64) -> LedgerResult<u64> {
        let _guard = self.locks.lock(user_id).await;
        let balance = self.store.adjust_balance(user_id, amount as i64).await?;
        log::info!("withdrawal refund user_id={} +{} balance={}", user_id, amount, balance);
        Ok(balance)
    }

    /// Credits a paid invoice. Returns `None` when the invoice was settled before.
    /// A failed credit leaves the invoice unsettled so the next poll can retry it.
    pub async fn settle_deposit(&self, invoice: &DepositInvoice) -> LedgerResult<Option<u64>> {
        let _guard = self.locks.lock(invoice.user_id).await;
        let credited = self
            .store
            .settle_invoice(invoice.invoice_id, invoice.user_id, invoice.units)
            .await?;
        match credited {
            Some(balance) => log::info!(
                "deposit user_id={} invoice={} +{} balance={}",
                invoice.user_id,
                invoice.invoice_id,
                invoice.units,
                balance
            ),
            None => log::debug!("invoice {} already settled", invoice.invoice_id),
        }
        Ok(credited)
    }

    /// Admin override. Returns the previous balance.
    pub async fn admin_set_balance(&self, user_id: UserId, value: u64) -> LedgerResult<u64> {
        let _guard = self.locks.lock(user_id).await;
        let previous = self.store.set_balance(user_id, value).await?;
        log::warn!(
            "admin balance override user_id={} {} -> {}",
            user_id,
            previous,
            value
        );
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::types::RewardRange;
    use crate::application::payments::types::InvoiceStatus;
    use crate::application::tasks::types::{CompletionClaim, TaskStatus};
    use crate::infrastructure::database::MemoryStore;

    fn engine() -> LedgerEngine {
        let config = RewardConfig {
            mining_reward: RewardRange::fixed(3),
            ..RewardConfig::default()
        };
        LedgerEngine::new(Arc::new(MemoryStore::new()), config)
    }

    fn invoice(id: i64, user_id: UserId, units: u64) -> DepositInvoice {
        DepositInvoice {
            invoice_id: id,
            user_id,
            amount_usdt: "1.00".to_string(),
            units,
            pay_url: "https://t.me/CryptoBot?start=x".to_string(),
            status: InvoiceStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cooldown_boundary_is_inclusive_of_the_full_duration() {
        let t = Utc::now();
        let hour = Duration::hours(1);
        assert_eq!(cooldown_remaining(None, hour, t), None);
        assert_eq!(
            cooldown_remaining(Some(t), hour, t + Duration::minutes(59)),
            Some(Duration::minutes(1))
        );
        assert_eq!(cooldown_remaining(Some(t), hour, t + hour), None);
    }

    #[tokio::test]
    async fn mining_respects_cooldown() {
        let engine = engine();
        let t = Utc::now();
        engine.register(1, None, None, t).await.unwrap();

        let claim = engine.claim_mining(1, t).await.unwrap();
        assert_eq!(claim.reward, 3);
        assert_eq!(claim.balance, 3);

        let err = engine
            .claim_mining(1, t + Duration::minutes(30))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cooldown { .. }));
        assert_eq!(engine.user(1).await.unwrap().balance, 3);

        let claim = engine.claim_mining(1, t + Duration::hours(1)).await.unwrap();
        assert_eq!(claim.balance, 6);
    }

    #[tokio::test]
    async fn mining_requires_registration() {
        let engine = engine();
        assert!(matches!(
            engine.claim_mining(9, Utc::now()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn referral_bonus_is_paid_once_and_never_to_self() {
        let engine = engine();
        let now = Utc::now();
        engine.register(10, None, None, now).await.unwrap();

        let reg = engine.register(11, None, Some(10), now).await.unwrap();
        assert!(reg.created);
        assert_eq!(reg.referral_bonus, Some((10, 3)));
        assert_eq!(reg.user.referrer_id, Some(10));

        // Repeat contact with the same link pays nothing.
        let again = engine.register(11, None, Some(10), now).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.referral_bonus, None);

        let selfie = engine.register(12, None, Some(12), now).await.unwrap();
        assert_eq!(selfie.referral_bonus, None);
        assert_eq!(selfie.user.referrer_id, None);

        let unknown = engine.register(13, None, Some(999), now).await.unwrap();
        assert_eq!(unknown.referral_bonus, None);

        let referrer = engine.user(10).await.unwrap();
        assert_eq!(referrer.balance, 3);
        assert_eq!(referrer.referrals, vec![11]);
        assert_eq!(engine.user(12).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn withdrawal_debit_checks_minimum_and_funds_before_mutation() {
        let engine = engine();
        engine.register(1, None, None, Utc::now()).await.unwrap();
        engine.admin_set_balance(1, 20).await.unwrap();

        assert!(matches!(
            engine.debit_withdrawal(1, 4).await,
            Err(LedgerError::BelowMinimum { minimum: 5, .. })
        ));
        assert!(matches!(
            engine.debit_withdrawal(1, 21).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            engine.debit_withdrawal(1, 0).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(engine.user(1).await.unwrap().balance, 20);

        assert_eq!(engine.debit_withdrawal(1, 15).await.unwrap(), 5);
        assert_eq!(engine.refund_withdrawal(1, 15).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn deposit_settles_once_per_invoice() {
        let engine = engine();
        engine.register(1, None, None, Utc::now()).await.unwrap();
        let paid = invoice(77, 1, 500);

        assert_eq!(engine.settle_deposit(&paid).await.unwrap(), Some(500));
        assert_eq!(engine.settle_deposit(&paid).await.unwrap(), None);
        assert_eq!(engine.user(1).await.unwrap().balance, 500);
    }

    #[tokio::test]
    async fn failed_deposit_credit_leaves_invoice_open() {
        let engine = engine();
        let paid = invoice(78, 5, 250);
        assert!(engine.settle_deposit(&paid).await.is_err());

        engine.register(5, None, None, Utc::now()).await.unwrap();
        assert_eq!(engine.settle_deposit(&paid).await.unwrap(), Some(250));
        assert_eq!(engine.settle_deposit(&paid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn username_change_on_return_keeps_completions() {
        let engine = engine();
        let now = Utc::now();
        engine.register(1, Some("old".into()), None, now).await.unwrap();
        let task = Task {
            id: 7,
            description: "follow".to_string(),
            image: None,
            reward: RewardRange::fixed(5),
            max_performers: None,
            performers: 0,
            status: TaskStatus::Active,
            created_at: now,
        };
        engine.store.insert_task_if_absent(&task).await.unwrap();
        assert_eq!(
            engine.store.claim_completion(1, 7, now).await.unwrap(),
            CompletionClaim::Recorded { closed_task: false }
        );

        let again = engine.register(1, Some("new".into()), None, now).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.user.username.as_deref(), Some("new"));
        assert_eq!(
            engine.store.claim_completion(1, 7, now).await.unwrap(),
            CompletionClaim::Duplicate
        );
        assert!(engine.user(1).await.unwrap().completed_tasks.contains_key(&7));
    }

    #[tokio::test]
    async fn concurrent_claims_pay_once() {
        let engine = Arc::new(engine());
        let now = Utc::now();
        engine.register(1, None, None, now).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.claim_mining(1, now).await.is_ok() })
            })
            .collect();
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(engine.user(1).await.unwrap().balance, 3);
    }
}
