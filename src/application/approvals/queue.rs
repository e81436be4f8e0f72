use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::types::{
    Decision, ProofId, ProofOutcome, ProofSubmission, ReviewStatus, WithdrawalId,
    WithdrawalOutcome, WithdrawalRequest,
};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::LedgerEngine;
use crate::application::ledger::types::UserId;
use crate::application::tasks::TaskRegistry;
use crate::application::tasks::types::TaskId;
use crate::infrastructure::database::LedgerStore;
use crate::infrastructure::gateway::PaymentGateway;

pub struct ApprovalQueue {
    store: Arc<dyn LedgerStore>,
    engine: Arc<LedgerEngine>,
    registry: Arc<TaskRegistry>,
    payouts: Option<Arc<dyn PaymentGateway>>,
    asset: String,
}

impl ApprovalQueue {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: Arc<LedgerEngine>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            payouts: None,
            asset: crate::application::payments::config::DEFAULT_ASSET.to_string(),
        }
    }

    /// Approved withdrawals get a payout check issued through `gateway`.
    pub fn with_payouts(mut self, gateway: Arc<dyn PaymentGateway>, asset: &str) -> Self {
        self.payouts = Some(gateway);
        self.asset = asset.to_string();
        self
    }

    pub async fn submit_proof(
        &self,
        user_id: UserId,
        task_id: TaskId,
        image_ref: String,
        now: DateTime<Utc>,
    ) -> LedgerResult<ProofId> {
        if image_ref.trim().is_empty() {
            return Err(LedgerError::InvalidInput("proof photo is required".to_string()));
        }
        let user = self.engine.user(user_id).await?;
        let task = self.registry.require_task(task_id).await?;
        if user.completed_tasks.contains_key(&task_id) {
            return Err(LedgerError::AlreadyCompleted { user_id, task_id });
        }
        if !task.is_active() || !task.has_free_slot() {
            return Err(LedgerError::TaskClosed(task_id));
        }

        let proof_id = self.store.next_proof_id().await?;
        if let Some(existing) = self
            .store
            .reserve_pending_proof(user_id, task_id, proof_id)
            .await?
        {
            log::debug!(
                "proof rejected user_id={} task={} pending={}",
                user_id,
                task_id,
                existing
            );
            return Err(LedgerError::AlreadyPending { task_id });
        }

        let proof = ProofSubmission {
            id: proof_id,
            user_id,
            task_id,
            image_ref,
            submitted_at: now,
            status: ReviewStatus::Pending,
            resolved_at: None,
        };
        if let Err(err) = self.store.save_proof(&proof).await {
            self.store.clear_pending_proof(user_id, task_id).await?;
            return Err(err);
        }
        log::info!("proof submitted id={} user_id={} task={}", proof_id, user_id, task_id);
        Ok(proof_id)
    }

    /// The pending -> terminal transition is the guard against double clicks: only one
    /// caller ever gets past it for a given proof id.
    pub async fn resolve_proof(
        &self,
        proof_id: ProofId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> LedgerResult<ProofOutcome> {
        let proof = self
            .store
            .transition_proof(proof_id, decision.status(), now)
            .await?;
        self.store
            .clear_pending_proof(proof.user_id, proof.task_id)
            .await?;

        match decision {
            Decision::Reject => {
                log::info!("proof rejected id={} user_id={}", proof.id, proof.user_id);
                Ok(ProofOutcome::Rejected { proof })
            }
            Decision::Approve => {
                let reward = match self
                    .registry
                    .record_completion(proof.user_id, proof.task_id, now)
                    .await
                {
                    Ok(task) => {
                        let (reward, _) = self.engine.credit_task_reward(proof.user_id, &task).await?;
                        Some(reward)
                    }
                    Err(
                        err @ (LedgerError::AlreadyCompleted { .. }
                        | LedgerError::TaskClosed(_)
                        | LedgerError::NotFound(_)),
                    ) => {
                        log::warn!("proof {} approved without reward: {}", proof.id, err);
                        None
                    }
                    Err(err) => return Err(err),
                };
                Ok(ProofOutcome::Approved { proof, reward })
            }
        }
    }

    pub async fn get_proof(&self, proof_id: ProofId) -> LedgerResult<ProofSubmission> {
        self.store
            .get_proof(proof_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("proof {}", proof_id)))
    }

    pub async fn pending_proofs(&self) -> LedgerResult<Vec<ProofSubmission>> {
        let mut proofs: Vec<_> = self
            .store
            .list_proofs()
            .await?
            .into_iter()
            .filter(|proof| proof.status == ReviewStatus::Pending)
            .collect();
        proofs.sort_by_key(|proof| proof.id);
        Ok(proofs)
    }

    /// Debits at request time. Nothing is recorded when the debit is refused.
    pub async fn submit_withdrawal(
        &self,
        user_id: UserId,
        amount: u64,
        destination: String,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalRequest> {
        self.engine.debit_withdrawal(user_id, amount).await?;

        let request = match self.store.next_withdrawal_id().await {
            Ok(id) => WithdrawalRequest {
                id,
                user_id,
                amount,
                asset: self.asset.clone(),
                destination,
                status: ReviewStatus::Pending,
                requested_at: now,
                resolved_at: None,
                check_url: None,
            },
            Err(err) => {
                self.engine.refund_withdrawal(user_id, amount).await?;
                return Err(err);
            }
        };
        if let Err(err) = self.store.save_withdrawal(&request).await {
            self.engine.refund_withdrawal(user_id, amount).await?;
            return Err(err);
        }
        log::info!(
            "withdrawal requested id={} user_id={} amount={}",
            request.id,
            user_id,
            amount
        );
        Ok(request)
    }

    pub async fn resolve_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalOutcome> {
        let mut request = self
            .store
            .transition_withdrawal(withdrawal_id, decision.status(), now)
            .await?;

        match decision {
            Decision::Reject => {
                let balance = self
                    .engine
                    .refund_withdrawal(request.user_id, request.amount)
                    .await?;
                log::info!(
                    "withdrawal rejected id={} user_id={} refunded={}",
                    request.id,
                    request.user_id,
                    request.amount
                );
                Ok(WithdrawalOutcome::Rejected { request, balance })
            }
            Decision::Approve => {
                if let Some(gateway) = &self.payouts {
                    let amount_usdt = self.engine.config().units_to_usdt(request.amount);
                    match gateway
                        .create_payout_check(request.user_id, &amount_usdt)
                        .await
                    {
                        Ok(check) => {
                            request.check_url = Some(check.check_url);
                            self.store.save_withdrawal(&request).await?;
                        }
                        Err(err) => {
                            log::error!(
                                "payout check for withdrawal {} failed, manual payout needed: {}",
                                request.id,
                                err
                            );
                        }
                    }
                }
                log::info!(
                    "withdrawal approved id={} user_id={} amount={} check={}",
                    request.id,
                    request.user_id,
                    request.amount,
                    request.check_url.is_some()
                );
                Ok(WithdrawalOutcome::Approved { request })
            }
        }
    }

    pub async fn get_withdrawal(&self, withdrawal_id: WithdrawalId) -> LedgerResult<WithdrawalRequest> {
        self.store
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", withdrawal_id)))
    }

    pub async fn pending_withdrawals(&self) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut requests: Vec<_> = self
            .store
            .list_withdrawals()
            .await?
            .into_iter()
            .filter(|request| request.status == ReviewStatus::Pending)
            .collect();
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::config::RewardConfig;
    use crate::application::ledger::types::RewardRange;
    use crate::application::tasks::types::NewTask;
    use crate::infrastructure::database::MemoryStore;
    use crate::infrastructure::gateway::{
        CreatedInvoice, GatewayError, GatewayInvoiceStatus, PayoutCheck,
    };
    use async_trait::async_trait;
    use chrono::Duration;

    struct Harness {
        engine: Arc<LedgerEngine>,
        registry: Arc<TaskRegistry>,
        queue: ApprovalQueue,
    }

    fn harness() -> Harness {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let config = RewardConfig {
            mining_reward: RewardRange::fixed(3),
            ..RewardConfig::default()
        };
        let engine = Arc::new(LedgerEngine::new(store.clone(), config));
        let registry = Arc::new(TaskRegistry::new(store.clone()));
        let queue = ApprovalQueue::new(store, engine.clone(), registry.clone());
        Harness {
            engine,
            registry,
            queue,
        }
    }

    fn task(id: TaskId, cap: Option<u32>) -> NewTask {
        NewTask {
            id: Some(id),
            description: "Join the chat".to_string(),
            image: None,
            reward: RewardRange::new(5, 10).unwrap(),
            max_performers: cap,
        }
    }

    struct FailingPayouts;

    #[async_trait]
    impl PaymentGateway for FailingPayouts {
        async fn create_invoice(&self, _: i64, _: &str) -> Result<CreatedInvoice, GatewayError> {
            Err(GatewayError::Transport("offline".to_string()))
        }

        async fn get_invoice_status(&self, _: i64) -> Result<GatewayInvoiceStatus, GatewayError> {
            Err(GatewayError::Transport("offline".to_string()))
        }

        async fn create_payout_check(&self, _: i64, _: &str) -> Result<PayoutCheck, GatewayError> {
            Err(GatewayError::Api("NOT_ENOUGH_COINS".to_string()))
        }
    }

    #[tokio::test]
    async fn example_scenario_end_to_end() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, Some("alice".to_string()), None, t).await.unwrap();
        assert_eq!(h.engine.user(1).await.unwrap().balance, 0);

        assert_eq!(h.engine.claim_mining(1, t).await.unwrap().balance, 3);
        assert!(matches!(
            h.engine.claim_mining(1, t + Duration::minutes(10)).await,
            Err(LedgerError::Cooldown { .. })
        ));
        assert_eq!(h.engine.user(1).await.unwrap().balance, 3);

        h.registry.create_task(task(1, None), t).await.unwrap();
        let proof = h.queue.submit_proof(1, 1, "file-id".to_string(), t).await.unwrap();
        let reward = match h.queue.resolve_proof(proof, Decision::Approve, t).await.unwrap() {
            ProofOutcome::Approved { reward: Some(reward), .. } => reward,
            other => panic!("unexpected {:?}", other),
        };
        assert!((5..=10).contains(&reward));
        let balance = h.engine.user(1).await.unwrap().balance;
        assert_eq!(balance, 3 + reward);
        assert!(matches!(
            h.queue.resolve_proof(proof, Decision::Approve, t).await,
            Err(LedgerError::AlreadyResolved(_))
        ));

        assert!(matches!(
            h.queue
                .submit_withdrawal(1, balance + 1, "check:1".to_string(), t)
                .await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(h.engine.user(1).await.unwrap().balance, balance);
        assert!(h.queue.pending_withdrawals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_proof_while_pending_is_refused() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, None, None, t).await.unwrap();
        h.registry.create_task(task(2, None), t).await.unwrap();

        let first = h.queue.submit_proof(1, 2, "a".to_string(), t).await.unwrap();
        assert!(matches!(
            h.queue.submit_proof(1, 2, "b".to_string(), t).await,
            Err(LedgerError::AlreadyPending { task_id: 2 })
        ));

        h.queue.resolve_proof(first, Decision::Reject, t).await.unwrap();
        // A rejection frees the slot for another attempt.
        let second = h.queue.submit_proof(1, 2, "c".to_string(), t).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(h.queue.pending_proofs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn task_reward_is_paid_at_most_once_per_user() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, None, None, t).await.unwrap();
        h.registry.create_task(task(3, None), t).await.unwrap();

        let proof = h.queue.submit_proof(1, 3, "a".to_string(), t).await.unwrap();
        h.queue.resolve_proof(proof, Decision::Approve, t).await.unwrap();
        let balance = h.engine.user(1).await.unwrap().balance;

        assert!(matches!(
            h.queue.submit_proof(1, 3, "b".to_string(), t).await,
            Err(LedgerError::AlreadyCompleted { .. })
        ));
        assert!(matches!(
            h.queue.resolve_proof(proof, Decision::Reject, t).await,
            Err(LedgerError::AlreadyResolved(_))
        ));
        assert_eq!(h.engine.user(1).await.unwrap().balance, balance);
    }

    #[tokio::test]
    async fn racing_approvals_credit_once() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, None, None, t).await.unwrap();
        h.registry.create_task(task(4, None), t).await.unwrap();
        let proof = h.queue.submit_proof(1, 4, "a".to_string(), t).await.unwrap();

        let queue = Arc::new(h.queue);
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.resolve_proof(proof, Decision::Approve, t).await })
            })
            .collect();
        let mut credited = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(ProofOutcome::Approved { reward: Some(_), .. }) => credited += 1,
                Err(LedgerError::AlreadyResolved(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(credited, 1);
        let balance = h.engine.user(1).await.unwrap().balance;
        assert!((5..=10).contains(&balance));
    }

    #[tokio::test]
    async fn capped_task_approves_without_reward_once_full() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, None, None, t).await.unwrap();
        h.engine.register(2, None, None, t).await.unwrap();
        h.registry.create_task(task(5, Some(1)), t).await.unwrap();

        let first = h.queue.submit_proof(1, 5, "a".to_string(), t).await.unwrap();
        let second = h.queue.submit_proof(2, 5, "b".to_string(), t).await.unwrap();
        h.queue.resolve_proof(first, Decision::Approve, t).await.unwrap();

        match h.queue.resolve_proof(second, Decision::Approve, t).await.unwrap() {
            ProofOutcome::Approved { reward, .. } => assert_eq!(reward, None),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.engine.user(2).await.unwrap().balance, 0);
        assert!(matches!(
            h.queue.submit_proof(2, 5, "c".to_string(), t).await,
            Err(LedgerError::TaskClosed(5))
        ));
    }

    #[tokio::test]
    async fn rejected_withdrawal_restores_the_exact_balance() {
        let h = harness();
        let t = Utc::now();
        h.engine.register(1, None, None, t).await.unwrap();
        h.engine.admin_set_balance(1, 42).await.unwrap();

        assert!(matches!(
            h.queue.submit_withdrawal(1, 2, "check:1".to_string(), t).await,
            Err(LedgerError::BelowMinimum { .. })
        ));
        let request = h
            .queue
            .submit_withdrawal(1, 30, "check:1".to_string(), t)
            .await
            .unwrap();
        assert_eq!(h.engine.user(1).await.unwrap().balance, 12);
        assert_eq!(h.queue.pending_withdrawals().await.unwrap().len(), 1);

        match h
            .queue
            .resolve_withdrawal(request.id, Decision::Reject, t)
            .await
            .unwrap()
        {
            WithdrawalOutcome::Rejected { balance, .. } => assert_eq!(balance, 42),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            h.queue.resolve_withdrawal(request.id, Decision::Reject, t).await,
            Err(LedgerError::AlreadyResolved(_))
        ));
        assert_eq!(h.engine.user(1).await.unwrap().balance, 42);
    }

    #[tokio::test]
    async fn approved_withdrawal_stands_when_payout_check_fails() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let engine = Arc::new(LedgerEngine::new(store.clone(), RewardConfig::default()));
        let registry = Arc::new(TaskRegistry::new(store.clone()));
        let queue = ApprovalQueue::new(store, engine.clone(), registry)
            .with_payouts(Arc::new(FailingPayouts), "USDT");
        let t = Utc::now();
        engine.register(1, None, None, t).await.unwrap();
        engine.admin_set_balance(1, 50).await.unwrap();

        let request = queue.submit_withdrawal(1, 50, "check:1".to_string(), t).await.unwrap();
        match queue.resolve_withdrawal(request.id, Decision::Approve, t).await.unwrap() {
            WithdrawalOutcome::Approved { request } => {
                assert_eq!(request.status, ReviewStatus::Approved);
                assert_eq!(request.check_url, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.user(1).await.unwrap().balance, 0);
    }
}
