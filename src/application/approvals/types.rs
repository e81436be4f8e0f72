use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ledger::types::UserId;
use crate::application::tasks::types::TaskId;

pub type ProofId = u64;
pub type WithdrawalId = u64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject => ReviewStatus::Rejected,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProofSubmission {
    pub id: ProofId,
    pub user_id: UserId,
    pub task_id: TaskId,
    pub image_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: u64,
    pub asset: String,
    pub destination: String,
    pub status: ReviewStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProofOutcome {
    /// `reward` is `None` when the completion was refused (duplicate, task full or deleted).
    Approved {
        proof: ProofSubmission,
        reward: Option<u64>,
    },
    Rejected {
        proof: ProofSubmission,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum WithdrawalOutcome {
    Approved { request: WithdrawalRequest },
    Rejected { request: WithdrawalRequest, balance: u64 },
}
