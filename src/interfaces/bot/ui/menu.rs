use chrono::{DateTime, Duration, Utc};

use crate::application::admin::BotStats;
use crate::application::approvals::types::{ProofSubmission, WithdrawalRequest};
use crate::application::leaderboard::{Board, LeaderboardEntry, Period};
use crate::application::ledger::config::RewardConfig;
use crate::application::ledger::types::{MiningClaim, User};
use crate::application::payments::{DepositEvent, types::DepositInvoice};
use crate::application::tasks::types::Task;
use crate::interfaces::bot::ui::states::State;

pub fn escape_markdown(text: &str) -> String {
    text.replace("\\", "\\\\")
        .replace("_", "\\_")
        .replace("*", "\\*")
        .replace("[", "\\[")
        .replace("]", "\\]")
        .replace("(", "\\(")
        .replace(")", "\\)")
        .replace("~", "\\~")
        .replace("`", "\\`")
        .replace(">", "\\>")
        .replace("#", "\\#")
        .replace("+", "\\+")
        .replace("-", "\\-")
        .replace("=", "\\=")
        .replace("|", "\\|")
        .replace("{", "\\{")
        .replace("}", "\\}")
        .replace(".", "\\.")
        .replace("!", "\\!")
}

fn title(text: &str) -> String {
    format!("*{}*", escape_markdown(text))
}

fn lines(parts: &[String]) -> String {
    parts.join("\n")
}

fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%d.%m.%Y %H:%M").to_string()
}

pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn welcome_text(user: &User, referral_credited: bool) -> String {
    let mut parts = vec![
        title("🤖 Welcome to Zebranium mining!"),
        String::new(),
        escape_markdown("Mine ZB every hour, complete tasks and invite friends to grow your balance."),
    ];
    if referral_credited {
        parts.push(escape_markdown("You joined through a friend's invite link."));
    }
    parts.push(String::new());
    parts.push(escape_markdown(&format!(
        "Your balance: {} ZB. Pick an action below.",
        user.balance
    )));
    lines(&parts)
}

pub fn referral_bonus_text(referred: &User, bonus: u64) -> String {
    escape_markdown(&format!(
        "🎉 @{} joined with your link! +{} ZB",
        referred.username_display(),
        bonus
    ))
}

pub fn profile_text(user: &User, rewards: &RewardConfig) -> String {
    lines(&[
        title("👤 Your profile"),
        escape_markdown(&format!("🆔 ID: {}", user.id)),
        escape_markdown(&format!("🔗 Username: @{}", user.username_display())),
        escape_markdown(&format!("📅 Registered: {}", format_date(&user.registered_at))),
        escape_markdown(&format!("👥 Referrals: {}", user.referrals.len())),
        escape_markdown(&format!("✅ Completed tasks: {}", user.completed_tasks.len())),
        escape_markdown(&format!(
            "💎 Balance: {} ZB (≈{} USDT)",
            user.balance,
            rewards.units_to_usdt(user.balance)
        )),
        String::new(),
        escape_markdown(&format!(
            "Minimum withdrawal: {} ZB ({} USDT)",
            rewards.min_withdrawal,
            rewards.units_to_usdt(rewards.min_withdrawal)
        )),
    ])
}

pub fn referrals_text(link: &str, count: usize, bonus: u64) -> String {
    lines(&[
        title("🔗 Your referral link"),
        escape_markdown(link),
        String::new(),
        escape_markdown(&format!("👥 Invited users: {}", count)),
        escape_markdown(&format!("💎 You earn {} ZB for every invited friend!", bonus)),
    ])
}

pub fn mining_success_text(claim: &MiningClaim, cooldown: Duration) -> String {
    lines(&[
        escape_markdown(&format!("⛏ You mined {} ZB!", claim.reward)),
        escape_markdown(&format!("💎 Balance: {} ZB", claim.balance)),
        escape_markdown(&format!("⏳ Next claim in {}", format_remaining(cooldown))),
    ])
}

pub fn mining_cooldown_text(remaining: Duration, balance: u64) -> String {
    lines(&[
        escape_markdown(&format!(
            "⏳ Next mining is available in {}",
            format_remaining(remaining)
        )),
        escape_markdown(&format!("💎 Balance: {} ZB", balance)),
    ])
}

pub fn tasks_list_text(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return escape_markdown("📭 No tasks are available right now.");
    }
    let mut parts = vec![title("📋 Available tasks"), String::new()];
    for task in tasks {
        parts.push(escape_markdown(&format!(
            "• Task {}: {} ZB",
            task.id, task.reward
        )));
    }
    parts.push(String::new());
    parts.push(escape_markdown("Pick a task below:"));
    lines(&parts)
}

pub fn task_detail_text(task: &Task, already_done: bool) -> String {
    let mut parts = vec![
        title(&format!("📝 Task {}", task.id)),
        String::new(),
        escape_markdown(&task.description),
        String::new(),
        escape_markdown(&format!("💎 Reward: {} ZB", task.reward)),
    ];
    if let Some(cap) = task.max_performers {
        parts.push(escape_markdown(&format!(
            "👥 Slots: {}/{}",
            task.performers, cap
        )));
    }
    if already_done {
        parts.push(escape_markdown("✅ You have already completed this task."));
    } else {
        parts.push(escape_markdown(
            "When done, press the button and send a screenshot as proof.",
        ));
    }
    lines(&parts)
}

pub fn tops_text(board: Board, period: Period, entries: &[LeaderboardEntry]) -> String {
    let (heading, unit) = match board {
        Board::Referrals => ("🏆 Top inviters", "referrals"),
        Board::Tasks => ("🏆 Top task performers", "tasks"),
    };
    let heading = format!("{} of the {}", heading, period.label());
    if entries.is_empty() {
        return escape_markdown(&format!("{}: nobody yet.", heading));
    }
    let mut parts = vec![title(&heading), String::new()];
    for (rank, entry) in entries.iter().enumerate() {
        parts.push(escape_markdown(&format!(
            "{}. @{} (ID: {}) - {} {}",
            rank + 1,
            entry.username.as_deref().unwrap_or("—"),
            entry.user_id,
            entry.count,
            unit
        )));
    }
    lines(&parts)
}

pub fn help_text() -> String {
    lines(&[
        title("✉️ Help"),
        escape_markdown("⛏ Mining: claim ZB once per cooldown period."),
        escape_markdown("💼 Tasks: complete a task and send a screenshot, an admin reviews it."),
        escape_markdown("👥 Referrals: share your link and earn a bonus per friend."),
        escape_markdown("👤 Profile: deposit USDT or request a withdrawal."),
        escape_markdown("Send /cancel at any time to stop the current step."),
    ])
}

pub fn blocked_text() -> String {
    escape_markdown("🚫 Your account has been blocked.")
}

pub fn maintenance_text() -> String {
    escape_markdown("🔧 The bot is under maintenance. Please come back later.")
}

pub fn cancelled_text() -> String {
    escape_markdown("❌ Cancelled.")
}

pub fn main_menu_text() -> String {
    escape_markdown("🏠 Main menu")
}

pub fn unknown_input_text() -> String {
    escape_markdown("Use the menu buttons below.")
}

/// Question shown on entering `state`.
pub fn prompt_text(state: &State, rewards: &RewardConfig, balance: Option<u64>) -> String {
    let text = match state {
        State::Idle => return unknown_input_text(),
        State::AwaitingDepositAmount => {
            "💰 Enter the amount in USDT you want to deposit (for example: 5):".to_string()
        }
        State::AwaitingWithdrawAmount => format!(
            "💸 Available: {} ZB. Minimum: {} ZB ({} USDT).\nEnter the amount of ZB to withdraw:",
            balance.unwrap_or_default(),
            rewards.min_withdrawal,
            rewards.units_to_usdt(rewards.min_withdrawal)
        ),
        State::AwaitingWithdrawConfirm { amount } => format!(
            "Withdraw {} ZB (≈{} USDT)? The amount is held until an admin reviews the request.",
            amount,
            rewards.units_to_usdt(*amount)
        ),
        State::AwaitingTaskProof { task_id } => {
            format!("📸 Send a screenshot proving you completed task {}.", task_id)
        }
        State::AwaitingBroadcastText => "📨 Send the text to broadcast to every user:".to_string(),
        State::AwaitingTaskFieldNumber => {
            "Enter the task number, or skip to use the next free one:".to_string()
        }
        State::AwaitingTaskFieldText { .. } => "Enter the task description:".to_string(),
        State::AwaitingTaskFieldReward { .. } => format!(
            "Enter the reward (7 or 5-10), or skip for the default {} ZB:",
            rewards.task_reward
        ),
        State::AwaitingTaskFieldCap { .. } => {
            "Enter the maximum number of performers, or skip for unlimited:".to_string()
        }
        State::AwaitingTaskFieldPhoto { .. } => "Send a task image, or skip:".to_string(),
        State::AwaitingTaskDeleteNumber => "Enter the number of the task to delete:".to_string(),
        State::AwaitingAdminTargetId => "Enter the user id to edit:".to_string(),
        State::AwaitingAdminField { target } => format!("Editing user {}. Pick a field:", target),
        State::AwaitingAdminValue { target, field } => format!(
            "Enter the new {} for user {} (a number for balance, yes/no for blocked):",
            field.code(),
            target
        ),
    };
    escape_markdown(&text)
}

pub fn reprompt_text(hint: &str, state: &State, rewards: &RewardConfig, balance: Option<u64>) -> String {
    format!(
        "{}\n{}",
        escape_markdown(&format!("⚠️ {}", hint)),
        prompt_text(state, rewards, balance)
    )
}

pub fn invoice_text(invoice: &DepositInvoice) -> String {
    lines(&[
        escape_markdown(&format!(
            "✅ Invoice created for {} USDT ({} ZB).",
            invoice.amount_usdt, invoice.units
        )),
        escape_markdown(&format!("Pay here: {}", invoice.pay_url)),
        String::new(),
        escape_markdown("Your balance is credited automatically once the payment arrives."),
    ])
}

pub fn deposit_event_text(event: &DepositEvent) -> String {
    let text = match event {
        DepositEvent::Credited { invoice, balance } => format!(
            "✅ Your deposit of {} USDT arrived: +{} ZB. Balance: {} ZB.",
            invoice.amount_usdt, invoice.units, balance
        ),
        DepositEvent::Closed { invoice } => format!(
            "❌ The invoice for {} USDT was cancelled or expired.",
            invoice.amount_usdt
        ),
        DepositEvent::Lapsed { invoice } => format!(
            "❌ We stopped waiting for the {} USDT payment. If you paid, contact support.",
            invoice.amount_usdt
        ),
    };
    escape_markdown(&text)
}

pub fn withdrawal_submitted_text(request: &WithdrawalRequest, rewards: &RewardConfig) -> String {
    escape_markdown(&format!(
        "✅ Withdrawal request #{} for {} ZB (≈{} USDT) sent for review. The amount is on hold.",
        request.id,
        request.amount,
        rewards.units_to_usdt(request.amount)
    ))
}

pub fn withdrawal_review_text(request: &WithdrawalRequest, user: Option<&User>, rewards: &RewardConfig) -> String {
    lines(&[
        title(&format!("💸 Withdrawal #{}", request.id)),
        escape_markdown(&format!(
            "User: {} (@{})",
            request.user_id,
            user.map(User::username_display).unwrap_or("—")
        )),
        escape_markdown(&format!(
            "Amount: {} ZB (≈{} {})",
            request.amount,
            rewards.units_to_usdt(request.amount),
            request.asset
        )),
        escape_markdown(&format!("Destination: {}", request.destination)),
        escape_markdown(&format!("Requested: {}", format_date(&request.requested_at))),
    ])
}

pub fn withdrawal_approved_user_text(request: &WithdrawalRequest) -> String {
    let text = match &request.check_url {
        Some(url) => format!(
            "✅ Withdrawal #{} of {} ZB approved! Redeem your check: {}",
            request.id, request.amount, url
        ),
        None => format!(
            "✅ Withdrawal #{} of {} ZB approved. The payout will be sent manually.",
            request.id, request.amount
        ),
    };
    escape_markdown(&text)
}

pub fn withdrawal_rejected_user_text(request: &WithdrawalRequest, balance: u64) -> String {
    escape_markdown(&format!(
        "❌ Withdrawal #{} was rejected. {} ZB returned, balance: {} ZB.",
        request.id, request.amount, balance
    ))
}

pub fn proof_submitted_text(task_id: u32) -> String {
    escape_markdown(&format!(
        "✅ Proof for task {} sent for review. You will be notified of the decision.",
        task_id
    ))
}

pub fn proof_review_caption(proof: &ProofSubmission, user: Option<&User>, task: Option<&Task>) -> String {
    lines(&[
        title(&format!("📝 Proof #{}", proof.id)),
        escape_markdown(&format!(
            "User: {} (@{})",
            proof.user_id,
            user.map(User::username_display).unwrap_or("—")
        )),
        escape_markdown(&format!(
            "Task {}: {}",
            proof.task_id,
            task.map(|task| task.description.as_str()).unwrap_or("deleted")
        )),
        escape_markdown(&format!("Submitted: {}", format_date(&proof.submitted_at))),
    ])
}

pub fn proof_approved_user_text(task_id: u32, reward: Option<u64>) -> String {
    let text = match reward {
        Some(reward) => format!("✅ Task {} approved! +{} ZB", task_id, reward),
        None => format!(
            "✅ Task {} approved, but no reward was due (already rewarded or the task is closed).",
            task_id
        ),
    };
    escape_markdown(&text)
}

pub fn proof_rejected_user_text(task_id: u32) -> String {
    escape_markdown(&format!(
        "❌ Your proof for task {} was rejected. You may submit a new one.",
        task_id
    ))
}

pub fn admin_menu_text(maintenance: bool) -> String {
    lines(&[
        title("👑 Admin panel"),
        escape_markdown(&format!(
            "Maintenance mode: {}",
            if maintenance { "on" } else { "off" }
        )),
    ])
}

pub fn stats_text(stats: &BotStats, tracked_invoices: usize) -> String {
    lines(&[
        title("📊 Bot statistics"),
        escape_markdown(&format!("👤 Users: {}", stats.users)),
        escape_markdown(&format!("🚫 Blocked: {}", stats.blocked)),
        escape_markdown(&format!("💰 Total ZB: {}", stats.total_balance)),
        escape_markdown(&format!(
            "📝 Tasks: {} ({} active)",
            stats.tasks, stats.active_tasks
        )),
        escape_markdown(&format!("✅ Completions: {}", stats.completions)),
        escape_markdown(&format!("⏳ Proofs awaiting review: {}", stats.pending_proofs)),
        escape_markdown(&format!(
            "💸 Withdrawals awaiting review: {}",
            stats.pending_withdrawals
        )),
        escape_markdown(&format!("🧾 Invoices being watched: {}", tracked_invoices)),
    ])
}

pub fn broadcast_report_text(sent: usize, failed: usize) -> String {
    escape_markdown(&format!(
        "📨 Broadcast finished: {} delivered, {} failed.",
        sent, failed
    ))
}

pub fn review_queue_empty_text() -> String {
    escape_markdown("📭 Nothing is awaiting review.")
}

pub fn task_created_text(task_id: u32) -> String {
    escape_markdown(&format!("✅ Task {} created.", task_id))
}

pub fn task_deleted_text(task_id: u32, dropped_proofs: usize) -> String {
    escape_markdown(&format!(
        "🗑 Task {} deleted. {} pending proofs dropped, completion history kept.",
        task_id, dropped_proofs
    ))
}

pub fn user_updated_text(target: i64, change: &str) -> String {
    escape_markdown(&format!("✅ User {} updated: {}", target, change))
}

pub fn maintenance_toggled_text(enabled: bool) -> String {
    escape_markdown(&format!(
        "🔧 Maintenance mode is now {}.",
        if enabled { "on" } else { "off" }
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_markdown_v2_specials() {
        assert_eq!(escape_markdown("1.5 (ok)!"), "1\\.5 \\(ok\\)\\!");
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
    }

    #[test]
    fn remaining_time_is_human_readable() {
        assert_eq!(format_remaining(Duration::seconds(3599)), "59m 59s");
        assert_eq!(format_remaining(Duration::seconds(3720)), "1h 2m");
        assert_eq!(format_remaining(Duration::seconds(5)), "5s");
        assert_eq!(format_remaining(Duration::seconds(-5)), "0s");
    }
}
