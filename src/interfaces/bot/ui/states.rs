use crate::application::admin::AdminField;
use crate::application::ledger::types::{RewardRange, UserId};
use crate::application::tasks::types::TaskId;

/// Admin task-creation input collected across several steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskDraft {
    pub number: Option<TaskId>,
    pub description: String,
    pub reward: Option<RewardRange>,
    pub max_performers: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum State {
    #[default]
    Idle,
    AwaitingDepositAmount,
    AwaitingWithdrawAmount,
    AwaitingWithdrawConfirm {
        amount: u64,
    },
    AwaitingTaskProof {
        task_id: TaskId,
    },
    AwaitingBroadcastText,
    AwaitingTaskFieldNumber,
    AwaitingTaskFieldText {
        number: Option<TaskId>,
    },
    AwaitingTaskFieldReward {
        draft: TaskDraft,
    },
    AwaitingTaskFieldCap {
        draft: TaskDraft,
    },
    AwaitingTaskFieldPhoto {
        draft: TaskDraft,
    },
    AwaitingTaskDeleteNumber,
    AwaitingAdminTargetId,
    AwaitingAdminField {
        target: UserId,
    },
    AwaitingAdminValue {
        target: UserId,
        field: AdminField,
    },
}

impl State {
    pub fn is_idle(&self) -> bool {
        matches!(self, State::Idle)
    }

    pub fn is_admin_flow(&self) -> bool {
        matches!(
            self,
            State::AwaitingBroadcastText
                | State::AwaitingTaskFieldNumber
                | State::AwaitingTaskFieldText { .. }
                | State::AwaitingTaskFieldReward { .. }
                | State::AwaitingTaskFieldCap { .. }
                | State::AwaitingTaskFieldPhoto { .. }
                | State::AwaitingTaskDeleteNumber
                | State::AwaitingAdminTargetId
                | State::AwaitingAdminField { .. }
                | State::AwaitingAdminValue { .. }
        )
    }
}
