use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;

use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::LedgerEngine;
use crate::application::ledger::types::{User, UserId};
use crate::infrastructure::database::LedgerStore;

/// Telegram rejects messages above 4096 characters.
pub const MESSAGE_CHUNK_LIMIT: usize = 4000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BotStats {
    pub users: usize,
    pub blocked: usize,
    pub total_balance: u64,
    pub tasks: usize,
    pub active_tasks: usize,
    pub completions: usize,
    pub pending_proofs: usize,
    pub pending_withdrawals: usize,
}

/// Fields an administrator may overwrite on a user record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminField {
    Balance,
    Blocked,
}

impl AdminField {
    pub fn code(&self) -> &'static str {
        match self {
            AdminField::Balance => "balance",
            AdminField::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "balance" => Some(AdminField::Balance),
            "blocked" => Some(AdminField::Blocked),
            _ => None,
        }
    }
}

/// Read views and writes for administrators. Every write checks the caller against `admin_ids`.
pub struct AdminService {
    store: Arc<dyn LedgerStore>,
    engine: Arc<LedgerEngine>,
    admin_ids: HashSet<UserId>,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: Arc<LedgerEngine>,
        admin_ids: HashSet<UserId>,
    ) -> Self {
        Self {
            store,
            engine,
            admin_ids,
        }
    }

    fn authorize(&self, admin_id: UserId) -> LedgerResult<()> {
        if !self.admin_ids.contains(&admin_id) {
            log::warn!("user {} attempted an admin write", admin_id);
            return Err(LedgerError::Unauthorized(admin_id));
        }
        Ok(())
    }

    pub async fn stats(&self) -> LedgerResult<BotStats> {
        let mut stats = BotStats::default();
        let mut users = self.store.list_users().await?;
        while let Some(user) = users.next().await {
            let user = user?;
            stats.users += 1;
            stats.total_balance = stats.total_balance.saturating_add(user.balance);
            stats.completions += user.completed_tasks.len();
            if user.blocked {
                stats.blocked += 1;
            }
        }
        drop(users);

        let tasks = self.store.list_tasks().await?;
        stats.tasks = tasks.len();
        stats.active_tasks = tasks.iter().filter(|task| task.is_active()).count();
        stats.pending_proofs = self
            .store
            .list_proofs()
            .await?
            .iter()
            .filter(|proof| !proof.status.is_terminal())
            .count();
        stats.pending_withdrawals = self
            .store
            .list_withdrawals()
            .await?
            .iter()
            .filter(|request| !request.status.is_terminal())
            .count();
        Ok(stats)
    }

    /// One line per user, packed into message-sized chunks.
    pub async fn user_list(&self) -> LedgerResult<Vec<String>> {
        let mut lines = Vec::new();
        let mut users = self.store.list_users().await?;
        while let Some(user) = users.next().await {
            lines.push(user_line(&user?));
        }
        Ok(chunk_lines(&lines, MESSAGE_CHUNK_LIMIT))
    }

    pub async fn broadcast_targets(&self) -> LedgerResult<Vec<UserId>> {
        let mut targets = Vec::new();
        let mut users = self.store.list_users().await?;
        while let Some(user) = users.next().await {
            let user = user?;
            if !user.blocked {
                targets.push(user.id);
            }
        }
        Ok(targets)
    }

    pub async fn set_blocked(&self, admin_id: UserId, target: UserId, blocked: bool) -> LedgerResult<()> {
        self.authorize(admin_id)?;
        if self.store.get_user(target).await?.is_none() {
            return Err(LedgerError::user_not_found(target));
        }
        self.store.set_blocked(target, blocked).await?;
        log::warn!(
            "admin {} set blocked={} on user {}",
            admin_id,
            blocked,
            target
        );
        Ok(())
    }

    /// Applies a typed value to `field`. Returns a short description of the change.
    pub async fn edit_user(
        &self,
        admin_id: UserId,
        target: UserId,
        field: AdminField,
        raw_value: &str,
    ) -> LedgerResult<String> {
        self.authorize(admin_id)?;
        match field {
            AdminField::Balance => {
                let value: u64 = raw_value.trim().parse().map_err(|_| {
                    LedgerError::InvalidInput("balance must be a whole non-negative number".to_string())
                })?;
                let previous = self.engine.admin_set_balance(target, value).await?;
                log::info!("admin {} edited balance of user {}", admin_id, target);
                Ok(format!("balance {} -> {}", previous, value))
            }
            AdminField::Blocked => {
                let blocked = match raw_value.trim().to_lowercase().as_str() {
                    "yes" | "true" | "1" | "block" => true,
                    "no" | "false" | "0" | "unblock" => false,
                    _ => {
                        return Err(LedgerError::InvalidInput(
                            "answer yes or no".to_string(),
                        ));
                    }
                };
                self.set_blocked(admin_id, target, blocked).await?;
                Ok(format!("blocked = {}", blocked))
            }
        }
    }

    pub async fn maintenance_mode(&self) -> LedgerResult<bool> {
        self.store.maintenance_mode().await
    }

    pub async fn toggle_maintenance(&self, admin_id: UserId) -> LedgerResult<bool> {
        self.authorize(admin_id)?;
        let enabled = !self.store.maintenance_mode().await?;
        self.store.set_maintenance_mode(enabled).await?;
        log::warn!("admin {} switched maintenance mode to {}", admin_id, enabled);
        Ok(enabled)
    }
}

fn user_line(user: &User) -> String {
    format!(
        "{} | @{} | {} ZB | refs {} | tasks {}{}",
        user.id,
        user.username_display(),
        user.balance,
        user.referrals.len(),
        user.completed_tasks.len(),
        if user.blocked { " | blocked" } else { "" }
    )
}

/// Packs lines into chunks of at most `limit` bytes. A line longer than `limit` is split on
/// char boundaries.
pub fn chunk_lines(lines: &[String], limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in lines.iter().flat_map(|line| split_long(line, limit)) {
        if !current.is_empty() && current.len() + piece.len() + 1 > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(line: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = line;
    while rest.len() > limit {
        let mut cut = limit;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // A single char wider than the limit.
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}
