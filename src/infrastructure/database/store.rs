use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::application::approvals::types::{
    ProofId, ProofSubmission, ReviewStatus, WithdrawalId, WithdrawalRequest,
};
use crate::application::error::LedgerResult;
use crate::application::ledger::types::{User, UserId};
use crate::application::payments::types::{DepositInvoice, InvoiceId};
use crate::application::tasks::types::{CompletionClaim, Task, TaskId};

/// Keyed repository behind every ledger, task and review record.
///
/// Every mutation touches only the fields it names. There is no whole-record write, so a stale
/// `User` snapshot can never overwrite a concurrent credit, completion or referral.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> LedgerResult<Option<User>>;
    /// Returns `false` when the user already exists.
    async fn insert_user_if_absent(&self, user: &User) -> LedgerResult<bool>;
    async fn set_username(&self, id: UserId, username: &str) -> LedgerResult<()>;
    /// Atomic per user. Fails with `NotFound` or `InsufficientFunds`.
    async fn adjust_balance(&self, id: UserId, delta: i64) -> LedgerResult<u64>;
    /// Returns the previous balance.
    async fn set_balance(&self, id: UserId, value: u64) -> LedgerResult<u64>;
    async fn set_last_mined(&self, id: UserId, at: DateTime<Utc>) -> LedgerResult<()>;
    async fn set_blocked(&self, id: UserId, blocked: bool) -> LedgerResult<()>;
    /// Returns `false` when the pair was already linked.
    async fn add_referral(&self, referrer: UserId, referred: UserId) -> LedgerResult<bool>;
    async fn list_users(&self) -> LedgerResult<BoxStream<'_, LedgerResult<User>>>;
    async fn user_count(&self) -> LedgerResult<usize>;

    async fn next_task_id(&self) -> LedgerResult<TaskId>;
    async fn insert_task_if_absent(&self, task: &Task) -> LedgerResult<bool>;
    async fn get_task(&self, id: TaskId) -> LedgerResult<Option<Task>>;
    async fn list_tasks(&self) -> LedgerResult<Vec<Task>>;
    async fn delete_task(&self, id: TaskId) -> LedgerResult<bool>;
    /// Unique (user, task) write that also enforces the performer cap.
    async fn claim_completion(
        &self,
        user_id: UserId,
        task_id: TaskId,
        at: DateTime<Utc>,
    ) -> LedgerResult<CompletionClaim>;

    async fn next_proof_id(&self) -> LedgerResult<ProofId>;
    /// Reserves the pending slot for (user, task). Returns the occupying proof id on conflict.
    async fn reserve_pending_proof(
        &self,
        user_id: UserId,
        task_id: TaskId,
        proof_id: ProofId,
    ) -> LedgerResult<Option<ProofId>>;
    async fn clear_pending_proof(&self, user_id: UserId, task_id: TaskId) -> LedgerResult<()>;
    async fn save_proof(&self, proof: &ProofSubmission) -> LedgerResult<()>;
    async fn get_proof(&self, id: ProofId) -> LedgerResult<Option<ProofSubmission>>;
    /// Moves a pending proof to `to`; `AlreadyResolved` if it is terminal already.
    async fn transition_proof(
        &self,
        id: ProofId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<ProofSubmission>;
    async fn list_proofs(&self) -> LedgerResult<Vec<ProofSubmission>>;

    async fn next_withdrawal_id(&self) -> LedgerResult<WithdrawalId>;
    async fn save_withdrawal(&self, request: &WithdrawalRequest) -> LedgerResult<()>;
    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<WithdrawalRequest>>;
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalRequest>;
    async fn list_withdrawals(&self) -> LedgerResult<Vec<WithdrawalRequest>>;

    async fn save_invoice(&self, invoice: &DepositInvoice) -> LedgerResult<()>;
    async fn get_invoice(&self, id: InvoiceId) -> LedgerResult<Option<DepositInvoice>>;
    async fn list_invoices(&self) -> LedgerResult<Vec<DepositInvoice>>;
    /// Marks the invoice settled and credits `units` in one step. `None` when it was already
    /// settled; on error neither the marker nor the credit is applied.
    async fn settle_invoice(
        &self,
        id: InvoiceId,
        user_id: UserId,
        units: u64,
    ) -> LedgerResult<Option<u64>>;

    async fn maintenance_mode(&self) -> LedgerResult<bool>;
    async fn set_maintenance_mode(&self, enabled: bool) -> LedgerResult<()>;
}
