use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ledger::types::UserId;

pub type InvoiceId = i64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
    /// Polling gave up before the gateway reported a terminal status.
    Lapsed,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DepositInvoice {
    pub invoice_id: InvoiceId,
    pub user_id: UserId,
    pub amount_usdt: String,
    pub units: u64,
    pub pay_url: String,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a tracked invoice in the watcher.
#[derive(Clone, Debug)]
pub struct TrackedInvoice {
    pub invoice: DepositInvoice,
    pub attempts: u32,
}
