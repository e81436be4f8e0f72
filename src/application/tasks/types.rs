use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ledger::types::RewardRange;

pub type TaskId = u32;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Active,
    Closed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub reward: RewardRange,
    #[serde(default)]
    pub max_performers: Option<u32>,
    #[serde(default)]
    pub performers: u32,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    pub fn has_free_slot(&self) -> bool {
        self.max_performers
            .map(|cap| self.performers < cap)
            .unwrap_or(true)
    }
}

#[derive(Clone, Debug)]
pub struct NewTask {
    /// Admin-chosen id; the next free id is used when absent.
    pub id: Option<TaskId>,
    pub description: String,
    pub image: Option<String>,
    pub reward: RewardRange,
    pub max_performers: Option<u32>,
}

/// Result of the unique (user, task) completion write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionClaim {
    Recorded { closed_task: bool },
    Duplicate,
    CapReached,
    MissingTask,
}
