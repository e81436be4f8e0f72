use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::store::LedgerStore;
use crate::application::approvals::types::{
    ProofId, ProofSubmission, ReviewStatus, WithdrawalId, WithdrawalRequest,
};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::types::{User, UserId};
use crate::application::payments::types::{DepositInvoice, InvoiceId};
use crate::application::tasks::types::{CompletionClaim, Task, TaskId, TaskStatus};

/// Process-local store. Records live as long as the process; used when no `REDIS_URL` is set
/// and in tests.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    tasks: DashMap<TaskId, Task>,
    task_seq: AtomicU32,
    proofs: DashMap<ProofId, ProofSubmission>,
    pending_proofs: DashMap<(UserId, TaskId), ProofId>,
    proof_seq: AtomicU64,
    withdrawals: DashMap<WithdrawalId, WithdrawalRequest>,
    withdrawal_seq: AtomicU64,
    invoices: DashMap<InvoiceId, DepositInvoice>,
    settled_invoices: DashSet<InvoiceId>,
    maintenance: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> LedgerResult<Option<User>> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn insert_user_if_absent(&self, user: &User) -> LedgerResult<bool> {
        match self.users.entry(user.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(true)
            }
        }
    }

    async fn set_username(&self, id: UserId, username: &str) -> LedgerResult<()> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| LedgerError::user_not_found(id))?;
        entry.value_mut().username = Some(username.to_string());
        Ok(())
    }

    async fn adjust_balance(&self, id: UserId, delta: i64) -> LedgerResult<u64> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| LedgerError::user_not_found(id))?;
        let user = entry.value_mut();
        let updated = apply_delta(user.balance, delta)?;
        user.balance = updated;
        Ok(updated)
    }

    async fn set_balance(&self, id: UserId, value: u64) -> LedgerResult<u64> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| LedgerError::user_not_found(id))?;
        Ok(std::mem::replace(&mut entry.value_mut().balance, value))
    }

    async fn set_last_mined(&self, id: UserId, at: DateTime<Utc>) -> LedgerResult<()> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| LedgerError::user_not_found(id))?;
        entry.value_mut().last_mined_at = Some(at);
        Ok(())
    }

    async fn set_blocked(&self, id: UserId, blocked: bool) -> LedgerResult<()> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| LedgerError::user_not_found(id))?;
        entry.value_mut().blocked = blocked;
        Ok(())
    }

    async fn add_referral(&self, referrer: UserId, referred: UserId) -> LedgerResult<bool> {
        let mut entry = self
            .users
            .get_mut(&referrer)
            .ok_or_else(|| LedgerError::user_not_found(referrer))?;
        let user = entry.value_mut();
        if user.referrals.contains(&referred) {
            return Ok(false);
        }
        user.referrals.push(referred);
        Ok(true)
    }

    async fn list_users(&self) -> LedgerResult<BoxStream<'_, LedgerResult<User>>> {
        let snapshot: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        Ok(stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn user_count(&self) -> LedgerResult<usize> {
        Ok(self.users.len())
    }

    async fn next_task_id(&self) -> LedgerResult<TaskId> {
        loop {
            let candidate = self.task_seq.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.tasks.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    async fn insert_task_if_absent(&self, task: &Task) -> LedgerResult<bool> {
        match self.tasks.entry(task.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(true)
            }
        }
    }

    async fn get_task(&self, id: TaskId) -> LedgerResult<Option<Task>> {
        Ok(self.tasks.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_tasks(&self) -> LedgerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> LedgerResult<bool> {
        Ok(self.tasks.remove(&id).is_some())
    }

    async fn claim_completion(
        &self,
        user_id: UserId,
        task_id: TaskId,
        at: DateTime<Utc>,
    ) -> LedgerResult<CompletionClaim> {
        // Lock order: task entry, then user entry.
        let Some(mut task_entry) = self.tasks.get_mut(&task_id) else {
            return Ok(CompletionClaim::MissingTask);
        };
        let mut user_entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| LedgerError::user_not_found(user_id))?;
        let task = task_entry.value_mut();
        let user = user_entry.value_mut();

        if user.completed_tasks.contains_key(&task_id) {
            return Ok(CompletionClaim::Duplicate);
        }
        if !task.has_free_slot() {
            return Ok(CompletionClaim::CapReached);
        }

        user.completed_tasks.insert(task_id, at);
        task.performers += 1;
        let closed_task = !task.has_free_slot();
        if closed_task {
            task.status = TaskStatus::Closed;
        }
        Ok(CompletionClaim::Recorded { closed_task })
    }

    async fn next_proof_id(&self) -> LedgerResult<ProofId> {
        Ok(self.proof_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn reserve_pending_proof(
        &self,
        user_id: UserId,
        task_id: TaskId,
        proof_id: ProofId,
    ) -> LedgerResult<Option<ProofId>> {
        match self.pending_proofs.entry((user_id, task_id)) {
            Entry::Occupied(slot) => Ok(Some(*slot.get())),
            Entry::Vacant(slot) => {
                slot.insert(proof_id);
                Ok(None)
            }
        }
    }

    async fn clear_pending_proof(&self, user_id: UserId, task_id: TaskId) -> LedgerResult<()> {
        self.pending_proofs.remove(&(user_id, task_id));
        Ok(())
    }

    async fn save_proof(&self, proof: &ProofSubmission) -> LedgerResult<()> {
        self.proofs.insert(proof.id, proof.clone());
        Ok(())
    }

    async fn get_proof(&self, id: ProofId) -> LedgerResult<Option<ProofSubmission>> {
        Ok(self.proofs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn transition_proof(
        &self,
        id: ProofId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<ProofSubmission> {
        let mut entry = self
            .proofs
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("proof {}", id)))?;
        let proof = entry.value_mut();
        if proof.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved(format!("proof {}", id)));
        }
        proof.status = to;
        proof.resolved_at = Some(at);
        Ok(proof.clone())
    }

    async fn list_proofs(&self) -> LedgerResult<Vec<ProofSubmission>> {
        let mut proofs: Vec<_> = self.proofs.iter().map(|e| e.value().clone()).collect();
        proofs.sort_by_key(|proof| proof.id);
        Ok(proofs)
    }

    async fn next_withdrawal_id(&self) -> LedgerResult<WithdrawalId> {
        Ok(self.withdrawal_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn save_withdrawal(&self, request: &WithdrawalRequest) -> LedgerResult<()> {
        self.withdrawals.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<WithdrawalRequest>> {
        Ok(self.withdrawals.get(&id).map(|entry| entry.value().clone()))
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut entry = self
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", id)))?;
        let request = entry.value_mut();
        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved(format!("withdrawal {}", id)));
        }
        request.status = to;
        request.resolved_at = Some(at);
        Ok(request.clone())
    }

    async fn list_withdrawals(&self) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut requests: Vec<_> = self.withdrawals.iter().map(|e| e.value().clone()).collect();
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }

    async fn save_invoice(&self, invoice: &DepositInvoice) -> LedgerResult<()> {
        self.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: InvoiceId) -> LedgerResult<Option<DepositInvoice>> {
        Ok(self.invoices.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_invoices(&self) -> LedgerResult<Vec<DepositInvoice>> {
        Ok(self.invoices.iter().map(|e| e.value().clone()).collect())
    }

    async fn settle_invoice(
        &self,
        id: InvoiceId,
        user_id: UserId,
        units: u64,
    ) -> LedgerResult<Option<u64>> {
        // The user entry stays locked until both the marker and the credit are in.
        let mut entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| LedgerError::user_not_found(user_id))?;
        if self.settled_invoices.contains(&id) {
            return Ok(None);
        }
        let user = entry.value_mut();
        let updated = user
            .balance
            .checked_add(units)
            .ok_or_else(|| LedgerError::InvalidInput("balance overflow".to_string()))?;
        user.balance = updated;
        self.settled_invoices.insert(id);
        Ok(Some(updated))
    }

    async fn maintenance_mode(&self) -> LedgerResult<bool> {
        Ok(self.maintenance.load(Ordering::Acquire))
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> LedgerResult<()> {
        self.maintenance.store(enabled, Ordering::Release);
        Ok(())
    }
}

pub(crate) fn apply_delta(balance: u64, delta: i64) -> LedgerResult<u64> {
    if delta >= 0 {
        balance
            .checked_add(delta as u64)
            .ok_or_else(|| LedgerError::InvalidInput("balance overflow".to_string()))
    } else {
        let requested = delta.unsigned_abs();
        balance
            .checked_sub(requested)
            .ok_or(LedgerError::InsufficientFunds { balance, requested })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::types::RewardRange;

    fn task(id: TaskId, cap: Option<u32>) -> Task {
        Task {
            id,
            description: format!("task {}", id),
            image: None,
            reward: RewardRange::fixed(5),
            max_performers: cap,
            performers: 0,
            status: TaskStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn adjust_balance_refuses_overdraft_without_mutation() {
        let store = MemoryStore::new();
        store.insert_user_if_absent(&User::new(1, None, Utc::now())).await.unwrap();
        assert_eq!(store.adjust_balance(1, 10).await.unwrap(), 10);

        let err = store.adjust_balance(1, -11).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { balance: 10, requested: 11 }
        ));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 10);
        assert!(matches!(
            store.adjust_balance(2, 1).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn renaming_keeps_completions_claimed_after_a_read() {
        let store = MemoryStore::new();
        let user = User::new(1, Some("alice".into()), Utc::now());
        store.insert_user_if_absent(&user).await.unwrap();
        store.insert_task_if_absent(&task(7, None)).await.unwrap();
        store.adjust_balance(1, 42).await.unwrap();

        let snapshot = store.get_user(1).await.unwrap().unwrap();
        assert!(snapshot.completed_tasks.is_empty());
        assert_eq!(
            store.claim_completion(1, 7, Utc::now()).await.unwrap(),
            CompletionClaim::Recorded { closed_task: false }
        );
        store.set_username(1, "alice2").await.unwrap();

        assert_eq!(
            store.claim_completion(1, 7, Utc::now()).await.unwrap(),
            CompletionClaim::Duplicate
        );
        let stored = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(stored.balance, 42);
        assert_eq!(stored.username.as_deref(), Some("alice2"));
        assert!(stored.completed_tasks.contains_key(&7));
        assert!(matches!(
            store.set_username(2, "ghost").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn claim_completion_is_unique_and_honours_cap() {
        let store = MemoryStore::new();
        for id in 1..=3 {
            store.insert_user_if_absent(&User::new(id, None, Utc::now())).await.unwrap();
        }
        store.insert_task_if_absent(&task(7, Some(2))).await.unwrap();

        let now = Utc::now();
        assert_eq!(
            store.claim_completion(1, 7, now).await.unwrap(),
            CompletionClaim::Recorded { closed_task: false }
        );
        assert_eq!(
            store.claim_completion(1, 7, now).await.unwrap(),
            CompletionClaim::Duplicate
        );
        assert_eq!(
            store.claim_completion(2, 7, now).await.unwrap(),
            CompletionClaim::Recorded { closed_task: true }
        );
        assert_eq!(
            store.claim_completion(3, 7, now).await.unwrap(),
            CompletionClaim::CapReached
        );
        assert_eq!(
            store.claim_completion(3, 8, now).await.unwrap(),
            CompletionClaim::MissingTask
        );
        assert_eq!(store.get_task(7).await.unwrap().unwrap().status, TaskStatus::Closed);
    }

    #[tokio::test]
    async fn next_task_id_skips_admin_assigned_ids() {
        let store = MemoryStore::new();
        store.insert_task_if_absent(&task(1, None)).await.unwrap();
        store.insert_task_if_absent(&task(2, None)).await.unwrap();
        assert_eq!(store.next_task_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn invoice_settlement_credits_once() {
        let store = MemoryStore::new();
        store.insert_user_if_absent(&User::new(1, None, Utc::now())).await.unwrap();
        assert_eq!(store.settle_invoice(99, 1, 500).await.unwrap(), Some(500));
        assert_eq!(store.settle_invoice(99, 1, 500).await.unwrap(), None);
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 500);
    }

    #[tokio::test]
    async fn invoice_for_unknown_user_stays_unsettled() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.settle_invoice(99, 1, 500).await,
            Err(LedgerError::NotFound(_))
        ));
        store.insert_user_if_absent(&User::new(1, None, Utc::now())).await.unwrap();
        assert_eq!(store.settle_invoice(99, 1, 500).await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn recreated_task_starts_without_performers() {
        let store = MemoryStore::new();
        store.insert_user_if_absent(&User::new(1, None, Utc::now())).await.unwrap();
        store.insert_task_if_absent(&task(7, Some(1))).await.unwrap();
        store.claim_completion(1, 7, Utc::now()).await.unwrap();
        assert!(store.delete_task(7).await.unwrap());

        store.insert_task_if_absent(&task(7, Some(1))).await.unwrap();
        let fresh = store.get_task(7).await.unwrap().unwrap();
        assert_eq!(fresh.performers, 0);
        assert_eq!(fresh.status, TaskStatus::Active);
    }
}
