use crate::application::error::LedgerError;
use crate::application::ledger::config::RewardConfig;
use crate::interfaces::bot::ui::menu::{escape_markdown, format_remaining};

/// User-facing MarkdownV2 text for a failed step.
pub fn describe_error(err: &LedgerError, rewards: &RewardConfig) -> String {
    let text = match err {
        LedgerError::NotFound(what) => format!("❌ {} was not found.", capitalize(what)),
        LedgerError::InvalidInput(reason) => format!("⚠️ {}", capitalize(reason)),
        LedgerError::InsufficientFunds { balance, requested } => format!(
            "❌ Not enough funds: you have {} ZB, requested {} ZB.",
            balance, requested
        ),
        LedgerError::BelowMinimum { minimum, .. } => format!(
            "❌ The minimum withdrawal is {} ZB ({} USDT).",
            minimum,
            rewards.units_to_usdt(*minimum)
        ),
        LedgerError::AlreadyCompleted { task_id, .. } => {
            format!("✅ You have already completed task {}.", task_id)
        }
        LedgerError::AlreadyPending { task_id } => format!(
            "⏳ Your proof for task {} is still awaiting review.",
            task_id
        ),
        LedgerError::AlreadyResolved(what) => format!("ℹ️ {} was already resolved.", capitalize(what)),
        LedgerError::AlreadyExists(what) => format!("❌ {} already exists.", capitalize(what)),
        LedgerError::TaskClosed(task_id) => format!("🔒 Task {} is no longer available.", task_id),
        LedgerError::Cooldown { remaining } => format!(
            "⏳ Next mining is available in {}.",
            format_remaining(*remaining)
        ),
        LedgerError::Gateway(_) => {
            "⚠️ The payment service is unavailable right now. Please try again later.".to_string()
        }
        LedgerError::Unauthorized(_) => "🚫 This action is for administrators only.".to_string(),
        LedgerError::Storage(_) => "⚠️ Something went wrong. Please try again later.".to_string(),
    };
    escape_markdown(&text)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gateway::GatewayError;

    #[test]
    fn internal_details_never_reach_the_user() {
        let rewards = RewardConfig::default();
        let text = describe_error(&LedgerError::Storage("redis: connection reset".to_string()), &rewards);
        assert!(!text.contains("redis"));
        let text = describe_error(
            &LedgerError::Gateway(GatewayError::Api("UNAUTHORIZED".to_string())),
            &rewards,
        );
        assert!(!text.contains("UNAUTHORIZED"));
    }

    #[test]
    fn minimum_is_shown_in_both_units() {
        let text = describe_error(
            &LedgerError::BelowMinimum { amount: 1, minimum: 5 },
            &RewardConfig::default(),
        );
        assert!(text.contains("5 ZB"));
        assert!(text.contains("0\\.05 USDT"));
    }
}
