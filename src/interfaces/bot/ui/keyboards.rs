use lazy_static::lazy_static;
use regex::Regex;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::application::approvals::types::{Decision, ProofId, WithdrawalId};
use crate::application::leaderboard::{Board, Period};
use crate::application::tasks::types::{Task, TaskId};

pub const BTN_PROFILE: &str = "👤 Profile";
pub const BTN_REFERRALS: &str = "👥 Referrals";
pub const BTN_TASKS: &str = "💼 Tasks";
pub const BTN_MINING: &str = "⛏ Mining";
pub const BTN_TOPS: &str = "📈 Tops";
pub const BTN_HELP: &str = "✉️ Help";
pub const BTN_ADMIN: &str = "👑 Admin";

pub const BTN_STATS: &str = "📊 Statistics";
pub const BTN_USERS: &str = "🧾 Users";
pub const BTN_BROADCAST: &str = "📨 Broadcast";
pub const BTN_NEW_TASK: &str = "➕ New task";
pub const BTN_DELETE_TASK: &str = "🗑 Delete task";
pub const BTN_REVIEW: &str = "📝 Review queue";
pub const BTN_EDIT_USER: &str = "✏️ Edit user";
pub const BTN_EXPORT: &str = "📥 Export";
pub const BTN_MAINTENANCE_ON: &str = "🔧 Maintenance on";
pub const BTN_MAINTENANCE_OFF: &str = "🔧 Maintenance off";
pub const BTN_BACK: &str = "🔙 Back";

pub const BTN_CANCEL: &str = "🔙 Cancel";
pub const BTN_SKIP: &str = "⏭ Skip";
pub const BTN_CONFIRM: &str = "✅ Confirm";
pub const BTN_FIELD_BALANCE: &str = "Balance";
pub const BTN_FIELD_BLOCKED: &str = "Blocked";

lazy_static! {
    static ref TASK_CALLBACK: Regex = Regex::new(r"^task:(\d+)$").unwrap();
    static ref TASK_DONE_CALLBACK: Regex = Regex::new(r"^task_done:(\d+)$").unwrap();
    static ref TOP_CALLBACK: Regex =
        Regex::new(r"^top:(referrals|tasks)(?::(week|month))?$").unwrap();
    static ref REVIEW_CALLBACK: Regex =
        Regex::new(r"^(proof|wd):(approve|reject):(\d+)$").unwrap();
}

/// Inline button payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    Deposit,
    Withdraw,
    ConfirmWithdrawal,
    Cancel,
    ShowTask(TaskId),
    StartProof(TaskId),
    PickPeriod(Board),
    ShowTop(Board, Period),
    ResolveProof(ProofId, Decision),
    ResolveWithdrawal(WithdrawalId, Decision),
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "deposit" => return Some(Callback::Deposit),
            "withdraw" => return Some(Callback::Withdraw),
            "wd_confirm" => return Some(Callback::ConfirmWithdrawal),
            "cancel" => return Some(Callback::Cancel),
            _ => {}
        }
        if let Some(caps) = TASK_CALLBACK.captures(data) {
            return caps[1].parse().ok().map(Callback::ShowTask);
        }
        if let Some(caps) = TASK_DONE_CALLBACK.captures(data) {
            return caps[1].parse().ok().map(Callback::StartProof);
        }
        if let Some(caps) = TOP_CALLBACK.captures(data) {
            let board = Board::parse(&caps[1])?;
            return Some(match caps.get(2) {
                Some(period) => Callback::ShowTop(board, Period::parse(period.as_str())?),
                None => Callback::PickPeriod(board),
            });
        }
        if let Some(caps) = REVIEW_CALLBACK.captures(data) {
            let decision = match &caps[2] {
                "approve" => Decision::Approve,
                _ => Decision::Reject,
            };
            let id = caps[3].parse().ok()?;
            return Some(match &caps[1] {
                "proof" => Callback::ResolveProof(id, decision),
                _ => Callback::ResolveWithdrawal(id, decision),
            });
        }
        None
    }

    pub fn data(&self) -> String {
        match self {
            Callback::Deposit => "deposit".to_string(),
            Callback::Withdraw => "withdraw".to_string(),
            Callback::ConfirmWithdrawal => "wd_confirm".to_string(),
            Callback::Cancel => "cancel".to_string(),
            Callback::ShowTask(id) => format!("task:{}", id),
            Callback::StartProof(id) => format!("task_done:{}", id),
            Callback::PickPeriod(board) => format!("top:{}", board.label()),
            Callback::ShowTop(board, period) => format!("top:{}:{}", board.label(), period.label()),
            Callback::ResolveProof(id, decision) => format!("proof:{}:{}", verb(*decision), id),
            Callback::ResolveWithdrawal(id, decision) => format!("wd:{}:{}", verb(*decision), id),
        }
    }
}

fn verb(decision: Decision) -> &'static str {
    match decision {
        Decision::Approve => "approve",
        Decision::Reject => "reject",
    }
}

fn button(text: impl Into<String>, callback: Callback) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, callback.data())
}

fn reply_keyboard(rows: Vec<Vec<&str>>) -> KeyboardMarkup {
    KeyboardMarkup::new(
        rows.into_iter()
            .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
    )
    .resize_keyboard(true)
}

pub fn main_menu_keyboard(is_admin: bool) -> KeyboardMarkup {
    let mut rows = vec![
        vec![BTN_PROFILE],
        vec![BTN_REFERRALS, BTN_TASKS],
        vec![BTN_MINING, BTN_TOPS],
        vec![BTN_HELP],
    ];
    if is_admin {
        rows.push(vec![BTN_ADMIN]);
    }
    reply_keyboard(rows)
}

pub fn admin_menu_keyboard(maintenance: bool) -> KeyboardMarkup {
    let maintenance_button = if maintenance {
        BTN_MAINTENANCE_OFF
    } else {
        BTN_MAINTENANCE_ON
    };
    reply_keyboard(vec![
        vec![BTN_STATS, BTN_USERS],
        vec![BTN_BROADCAST, BTN_REVIEW],
        vec![BTN_NEW_TASK, BTN_DELETE_TASK],
        vec![BTN_EDIT_USER, BTN_EXPORT],
        vec![maintenance_button],
        vec![BTN_BACK],
    ])
}

pub fn cancel_keyboard() -> KeyboardMarkup {
    reply_keyboard(vec![vec![BTN_CANCEL]])
}

pub fn skip_keyboard() -> KeyboardMarkup {
    reply_keyboard(vec![vec![BTN_SKIP], vec![BTN_CANCEL]])
}

pub fn admin_field_keyboard() -> KeyboardMarkup {
    reply_keyboard(vec![vec![BTN_FIELD_BALANCE, BTN_FIELD_BLOCKED], vec![BTN_CANCEL]])
}

pub fn profile_keyboard(can_withdraw: bool) -> InlineKeyboardMarkup {
    let mut row = vec![button("💰 Deposit", Callback::Deposit)];
    if can_withdraw {
        row.push(button("💸 Withdraw", Callback::Withdraw));
    }
    InlineKeyboardMarkup::new(vec![row])
}

pub fn withdraw_confirm_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button(BTN_CONFIRM, Callback::ConfirmWithdrawal),
        button("❌ Cancel", Callback::Cancel),
    ]])
}

pub fn tasks_keyboard(tasks: &[Task]) -> InlineKeyboardMarkup {
    let buttons: Vec<Vec<InlineKeyboardButton>> = tasks
        .chunks(2)
        .map(|chunk| {
            chunk
                .iter()
                .map(|task| button(format!("Task {}", task.id), Callback::ShowTask(task.id)))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(buttons)
}

pub fn task_detail_keyboard(task_id: TaskId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        format!("✅ I completed task {}", task_id),
        Callback::StartProof(task_id),
    )]])
}

pub fn tops_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("🏆 Referrals", Callback::PickPeriod(Board::Referrals)),
        button("🏆 Tasks", Callback::PickPeriod(Board::Tasks)),
    ]])
}

pub fn period_keyboard(board: Board) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("📅 Week", Callback::ShowTop(board, Period::Week)),
        button("📅 Month", Callback::ShowTop(board, Period::Month)),
    ]])
}

pub fn proof_review_keyboard(proof_id: ProofId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("✅ Approve", Callback::ResolveProof(proof_id, Decision::Approve)),
        button("❌ Reject", Callback::ResolveProof(proof_id, Decision::Reject)),
    ]])
}

pub fn withdrawal_review_keyboard(withdrawal_id: WithdrawalId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button(
            "✅ Approve",
            Callback::ResolveWithdrawal(withdrawal_id, Decision::Approve),
        ),
        button(
            "❌ Reject",
            Callback::ResolveWithdrawal(withdrawal_id, Decision::Reject),
        ),
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_survive_their_payload_format() {
        let all = [
            Callback::Deposit,
            Callback::Withdraw,
            Callback::ConfirmWithdrawal,
            Callback::Cancel,
            Callback::ShowTask(12),
            Callback::StartProof(3),
            Callback::PickPeriod(Board::Tasks),
            Callback::ShowTop(Board::Referrals, Period::Month),
            Callback::ResolveProof(99, Decision::Reject),
            Callback::ResolveWithdrawal(7, Decision::Approve),
        ];
        for callback in all {
            assert_eq!(Callback::parse(&callback.data()), Some(callback.clone()));
        }
    }

    #[test]
    fn unknown_payloads_are_rejected() {
        for data in ["", "task:", "task:x", "top:coins", "proof:maybe:1", "wd:approve:-1"] {
            assert_eq!(Callback::parse(data), None, "{}", data);
        }
    }

    #[test]
    fn callback_data_fits_telegram_limit() {
        let longest = Callback::ResolveWithdrawal(u64::MAX, Decision::Approve).data();
        assert!(longest.len() <= 64);
    }
}
