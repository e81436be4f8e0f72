use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

use super::commands::*;
use crate::application::approvals::types::{
    ProofId, ProofSubmission, ReviewStatus, WithdrawalId, WithdrawalRequest,
};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::types::{User, UserId};
use crate::application::payments::types::{DepositInvoice, InvoiceId};
use crate::application::tasks::types::{CompletionClaim, Task, TaskId, TaskStatus};
use crate::infrastructure::database::store::LedgerStore;

/// Redis-backed store.
///
/// The user record is a JSON document written once at registration. Balance, referrals,
/// completions and the mutable profile fields live in their own keys so that every update is a
/// single command or script and never rewrites the document.
#[derive(Clone)]
pub struct RedisStore {
    con: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> LedgerResult<Self> {
        let con = super::client::connect(redis_url).await?;
        Ok(Self { con })
    }

    fn con(&self) -> MultiplexedConnection {
        self.con.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> LedgerResult<Option<T>> {
        let mut con = self.con();
        let raw: Option<String> = con.get(key).await?;
        raw.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(LedgerError::from)
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> LedgerResult<()> {
        let mut con = self.con();
        let data = serde_json::to_string(value)?;
        let _: () = con.set(key, data).await?;
        Ok(())
    }

    async fn set_json_nx<T: Serialize>(&self, key: &str, value: &T) -> LedgerResult<bool> {
        let mut con = self.con();
        let data = serde_json::to_string(value)?;
        let created: bool = con.set_nx(key, data).await?;
        Ok(created)
    }

    async fn get_many<T: DeserializeOwned>(
        &self,
        set_key: &str,
        key_for: impl Fn(&str) -> Option<String>,
    ) -> LedgerResult<Vec<T>> {
        let mut con = self.con();
        let members: Vec<String> = con.smembers(set_key).await?;
        let mut out = Vec::with_capacity(members.len());
        for member in members {
            let Some(key) = key_for(&member) else {
                continue;
            };
            if let Some(value) = self.get_json(&key).await? {
                out.push(value);
            }
        }
        Ok(out)
    }

    async fn require_user(&self, id: UserId) -> LedgerResult<User> {
        self.get_json::<User>(&user_key(id))
            .await?
            .ok_or_else(|| LedgerError::user_not_found(id))
    }

    async fn set_user_field(&self, id: UserId, field: &str, value: String) -> LedgerResult<()> {
        let mut con = self.con();
        let written: i64 = SET_USER_FIELD
            .key(user_key(id))
            .key(user_state_key(id))
            .arg(field)
            .arg(value)
            .invoke_async(&mut con)
            .await?;
        if written == 0 {
            return Err(LedgerError::user_not_found(id));
        }
        Ok(())
    }

    async fn hydrate_task(&self, mut task: Task) -> LedgerResult<Task> {
        let mut con = self.con();
        let performers: u32 = con.hlen(task_completions_key(task.id)).await?;
        task.performers = performers;
        if !task.has_free_slot() {
            task.status = TaskStatus::Closed;
        }
        Ok(task)
    }

    async fn overlay_resolution(
        &self,
        resolution_key: String,
    ) -> LedgerResult<Option<(ReviewStatus, DateTime<Utc>)>> {
        let mut con = self.con();
        let raw: Option<String> = con.get(resolution_key).await?;
        raw.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(LedgerError::from)
    }

    async fn resolve_once(
        &self,
        resolution_key: String,
        to: ReviewStatus,
        at: DateTime<Utc>,
        label: String,
    ) -> LedgerResult<()> {
        let mut con = self.con();
        let marker = serde_json::to_string(&(to, at))?;
        let won: bool = con.set_nx(resolution_key, marker).await?;
        if !won {
            return Err(LedgerError::AlreadyResolved(label));
        }
        Ok(())
    }
}

/// Fields of the `user_state` hash written after registration.
const FIELD_USERNAME: &str = "username";
const FIELD_LAST_MINED: &str = "last_mined_at";
const FIELD_BLOCKED: &str = "blocked";

fn apply_user_state(user: &mut User, state: HashMap<String, String>) {
    if let Some(name) = state.get(FIELD_USERNAME) {
        user.username = Some(name.clone());
    }
    if let Some(at) = state
        .get(FIELD_LAST_MINED)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        user.last_mined_at = Some(at.with_timezone(&Utc));
    }
    if let Some(flag) = state.get(FIELD_BLOCKED) {
        user.blocked = flag == "1";
    }
}

fn parse_completions(raw: HashMap<String, String>) -> BTreeMap<u32, DateTime<Utc>> {
    raw.into_iter()
        .filter_map(|(task, ts)| {
            let task_id = task.parse::<u32>().ok()?;
            let at = DateTime::parse_from_rfc3339(&ts).ok()?.with_timezone(&Utc);
            Some((task_id, at))
        })
        .collect()
}

#[async_trait]
impl LedgerStore for RedisStore {
    async fn get_user(&self, id: UserId) -> LedgerResult<Option<User>> {
        let Some(mut user) = self.get_json::<User>(&user_key(id)).await? else {
            return Ok(None);
        };
        let mut con = self.con();
        let (balance, referrals, completions, state): (
            Option<u64>,
            Vec<i64>,
            HashMap<String, String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .get(balance_key(id))
            .lrange(referrals_key(id), 0, -1)
            .hgetall(user_completions_key(id))
            .hgetall(user_state_key(id))
            .query_async(&mut con)
            .await?;
        apply_user_state(&mut user, state);
        user.balance = balance.unwrap_or(0);
        user.referrals = referrals;
        user.completed_tasks = parse_completions(completions);
        Ok(Some(user))
    }

    async fn insert_user_if_absent(&self, user: &User) -> LedgerResult<bool> {
        let created = self.set_json_nx(&user_key(user.id), user).await?;
        if created && user.balance > 0 {
            let mut con = self.con();
            let _: () = con.set(balance_key(user.id), user.balance).await?;
        }
        Ok(created)
    }

    async fn set_username(&self, id: UserId, username: &str) -> LedgerResult<()> {
        self.set_user_field(id, FIELD_USERNAME, username.to_string())
            .await
    }

    async fn adjust_balance(&self, id: UserId, delta: i64) -> LedgerResult<u64> {
        let mut con = self.con();
        let (code, value): (i64, i64) = ADJUST_BALANCE
            .key(balance_key(id))
            .key(user_key(id))
            .arg(delta)
            .invoke_async(&mut con)
            .await?;
        match code {
            0 => Ok(value.max(0) as u64),
            -1 => Err(LedgerError::user_not_found(id)),
            _ => Err(LedgerError::InsufficientFunds {
                balance: value.max(0) as u64,
                requested: delta.unsigned_abs(),
            }),
        }
    }

    async fn set_balance(&self, id: UserId, value: u64) -> LedgerResult<u64> {
        self.require_user(id).await?;
        let mut con = self.con();
        let previous: Option<u64> = con.getset(balance_key(id), value).await?;
        Ok(previous.unwrap_or(0))
    }

    async fn set_last_mined(&self, id: UserId, at: DateTime<Utc>) -> LedgerResult<()> {
        self.set_user_field(id, FIELD_LAST_MINED, at.to_rfc3339())
            .await
    }

    async fn set_blocked(&self, id: UserId, blocked: bool) -> LedgerResult<()> {
        let flag = if blocked { "1" } else { "0" };
        self.set_user_field(id, FIELD_BLOCKED, flag.to_string())
            .await
    }

    async fn add_referral(&self, referrer: UserId, referred: UserId) -> LedgerResult<bool> {
        self.require_user(referrer).await?;
        let mut con = self.con();
        let added: i64 = con.sadd(referral_set_key(referrer), referred).await?;
        if added == 0 {
            return Ok(false);
        }
        let _: () = con.rpush(referrals_key(referrer), referred).await?;
        Ok(true)
    }

    async fn list_users(&self) -> LedgerResult<BoxStream<'_, LedgerResult<User>>> {
        let mut con = self.con();
        let ids = scan_user_ids(&mut con).await?;
        Ok(stream::iter(ids)
            .then(move |id| self.get_user(id))
            .filter_map(|res| async move { res.transpose() })
            .boxed())
    }

    async fn user_count(&self) -> LedgerResult<usize> {
        let mut con = self.con();
        Ok(scan_user_ids(&mut con).await?.len())
    }

    async fn next_task_id(&self) -> LedgerResult<TaskId> {
        let mut con = self.con();
        loop {
            let candidate: u32 = con.incr(TASK_SEQ, 1).await?;
            let taken: bool = con.exists(task_key(candidate)).await?;
            if !taken {
                return Ok(candidate);
            }
        }
    }

    async fn insert_task_if_absent(&self, task: &Task) -> LedgerResult<bool> {
        let created = self.set_json_nx(&task_key(task.id), task).await?;
        if created {
            let mut con = self.con();
            let _: () = con.sadd(TASKS_SET, task.id).await?;
        }
        Ok(created)
    }

    async fn get_task(&self, id: TaskId) -> LedgerResult<Option<Task>> {
        match self.get_json::<Task>(&task_key(id)).await? {
            Some(task) => Ok(Some(self.hydrate_task(task).await?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self) -> LedgerResult<Vec<Task>> {
        let raw: Vec<Task> = self
            .get_many(TASKS_SET, |member| member.parse().ok().map(task_key))
            .await?;
        let mut tasks = Vec::with_capacity(raw.len());
        for task in raw {
            tasks.push(self.hydrate_task(task).await?);
        }
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> LedgerResult<bool> {
        let mut con = self.con();
        // Completion history stays in the per-user hashes; the per-task count goes with the task.
        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .del(task_key(id))
            .del(task_completions_key(id))
            .ignore()
            .srem(TASKS_SET, id)
            .ignore()
            .query_async(&mut con)
            .await?;
        Ok(removed > 0)
    }

    async fn claim_completion(
        &self,
        user_id: UserId,
        task_id: TaskId,
        at: DateTime<Utc>,
    ) -> LedgerResult<CompletionClaim> {
        let cap = match self.get_json::<Task>(&task_key(task_id)).await? {
            Some(task) => task.max_performers.map(i64::from).unwrap_or(-1),
            None => return Ok(CompletionClaim::MissingTask),
        };
        let mut con = self.con();
        let outcome: String = CLAIM_COMPLETION
            .key(task_key(task_id))
            .key(task_completions_key(task_id))
            .key(user_completions_key(user_id))
            .arg(user_id)
            .arg(task_id)
            .arg(at.to_rfc3339())
            .arg(cap)
            .invoke_async(&mut con)
            .await?;
        Ok(match outcome.as_str() {
            "recorded" => CompletionClaim::Recorded { closed_task: false },
            "closed" => CompletionClaim::Recorded { closed_task: true },
            "duplicate" => CompletionClaim::Duplicate,
            "full" => CompletionClaim::CapReached,
            _ => CompletionClaim::MissingTask,
        })
    }

    async fn next_proof_id(&self) -> LedgerResult<ProofId> {
        let mut con = self.con();
        Ok(con.incr(PROOF_SEQ, 1).await?)
    }

    async fn reserve_pending_proof(
        &self,
        user_id: UserId,
        task_id: TaskId,
        proof_id: ProofId,
    ) -> LedgerResult<Option<ProofId>> {
        let mut con = self.con();
        let key = pending_proof_key(user_id, task_id);
        let reserved: bool = con.set_nx(&key, proof_id).await?;
        if reserved {
            return Ok(None);
        }
        let existing: Option<ProofId> = con.get(&key).await?;
        Ok(Some(existing.unwrap_or(proof_id)))
    }

    async fn clear_pending_proof(&self, user_id: UserId, task_id: TaskId) -> LedgerResult<()> {
        let mut con = self.con();
        let _: () = con.del(pending_proof_key(user_id, task_id)).await?;
        Ok(())
    }

    async fn save_proof(&self, proof: &ProofSubmission) -> LedgerResult<()> {
        self.set_json(&proof_key(proof.id), proof).await?;
        let mut con = self.con();
        let _: () = con.sadd(PROOFS_SET, proof.id).await?;
        Ok(())
    }

    async fn get_proof(&self, id: ProofId) -> LedgerResult<Option<ProofSubmission>> {
        let Some(mut proof) = self.get_json::<ProofSubmission>(&proof_key(id)).await? else {
            return Ok(None);
        };
        if let Some((status, at)) = self.overlay_resolution(proof_resolution_key(id)).await? {
            proof.status = status;
            proof.resolved_at = Some(at);
        }
        Ok(Some(proof))
    }

    async fn transition_proof(
        &self,
        id: ProofId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<ProofSubmission> {
        let mut proof = self
            .get_proof(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("proof {}", id)))?;
        if proof.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved(format!("proof {}", id)));
        }
        self.resolve_once(proof_resolution_key(id), to, at, format!("proof {}", id))
            .await?;
        proof.status = to;
        proof.resolved_at = Some(at);
        self.set_json(&proof_key(id), &proof).await?;
        Ok(proof)
    }

    async fn list_proofs(&self) -> LedgerResult<Vec<ProofSubmission>> {
        let mut con = self.con();
        let members: Vec<u64> = con.smembers(PROOFS_SET).await?;
        let mut proofs = Vec::with_capacity(members.len());
        for id in members {
            if let Some(proof) = self.get_proof(id).await? {
                proofs.push(proof);
            }
        }
        proofs.sort_by_key(|proof| proof.id);
        Ok(proofs)
    }

    async fn next_withdrawal_id(&self) -> LedgerResult<WithdrawalId> {
        let mut con = self.con();
        Ok(con.incr(WITHDRAWAL_SEQ, 1).await?)
    }

    async fn save_withdrawal(&self, request: &WithdrawalRequest) -> LedgerResult<()> {
        self.set_json(&withdrawal_key(request.id), request).await?;
        let mut con = self.con();
        let _: () = con.sadd(WITHDRAWALS_SET, request.id).await?;
        Ok(())
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<WithdrawalRequest>> {
        let Some(mut request) = self
            .get_json::<WithdrawalRequest>(&withdrawal_key(id))
            .await?
        else {
            return Ok(None);
        };
        if let Some((status, at)) = self
            .overlay_resolution(withdrawal_resolution_key(id))
            .await?
        {
            request.status = status;
            request.resolved_at = Some(at);
        }
        Ok(Some(request))
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        to: ReviewStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut request = self
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", id)))?;
        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved(format!("withdrawal {}", id)));
        }
        self.resolve_once(
            withdrawal_resolution_key(id),
            to,
            at,
            format!("withdrawal {}", id),
        )
        .await?;
        request.status = to;
        request.resolved_at = Some(at);
        self.set_json(&withdrawal_key(id), &request).await?;
        Ok(request)
    }

    async fn list_withdrawals(&self) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut con = self.con();
        let members: Vec<u64> = con.smembers(WITHDRAWALS_SET).await?;
        let mut requests = Vec::with_capacity(members.len());
        for id in members {
            if let Some(request) = self.get_withdrawal(id).await? {
                requests.push(request);
            }
        }
        requests.sort_by_key(|request| request.id);
        Ok(requests)
    }

    async fn save_invoice(&self, invoice: &DepositInvoice) -> LedgerResult<()> {
        self.set_json(&invoice_key(invoice.invoice_id), invoice).await?;
        let mut con = self.con();
        let _: () = con.sadd(INVOICES_SET, invoice.invoice_id).await?;
        Ok(())
    }

    async fn get_invoice(&self, id: InvoiceId) -> LedgerResult<Option<DepositInvoice>> {
        self.get_json(&invoice_key(id)).await
    }

    async fn list_invoices(&self) -> LedgerResult<Vec<DepositInvoice>> {
        self.get_many(INVOICES_SET, |member| member.parse().ok().map(invoice_key))
            .await
    }

    async fn settle_invoice(
        &self,
        id: InvoiceId,
        user_id: UserId,
        units: u64,
    ) -> LedgerResult<Option<u64>> {
        let mut con = self.con();
        let (code, value): (i64, i64) = SETTLE_INVOICE
            .key(SETTLED_INVOICES_SET)
            .key(balance_key(user_id))
            .key(user_key(user_id))
            .arg(id)
            .arg(units)
            .invoke_async(&mut con)
            .await?;
        match code {
            0 => Ok(Some(value.max(0) as u64)),
            1 => Ok(None),
            _ => Err(LedgerError::user_not_found(user_id)),
        }
    }

    async fn maintenance_mode(&self) -> LedgerResult<bool> {
        let mut con = self.con();
        let flag: Option<String> = con.get(MAINTENANCE_KEY).await?;
        Ok(flag.as_deref() == Some("1"))
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> LedgerResult<()> {
        let mut con = self.con();
        let _: () = con
            .set(MAINTENANCE_KEY, if enabled { "1" } else { "0" })
            .await?;
        Ok(())
    }
}
