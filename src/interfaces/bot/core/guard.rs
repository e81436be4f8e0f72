use std::sync::Arc;

use crate::application::Services;
use crate::application::error::LedgerResult;
use crate::application::ledger::types::UserId;

/// Outcome of the pre-handler check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Pass,
    Blocked,
    Maintenance,
}

/// Administrators are never gated.
pub fn evaluate(is_admin: bool, blocked: bool, maintenance: bool) -> Gate {
    if is_admin {
        Gate::Pass
    } else if blocked {
        Gate::Blocked
    } else if maintenance {
        Gate::Maintenance
    } else {
        Gate::Pass
    }
}

pub async fn check(services: &Services, user_id: UserId) -> LedgerResult<Gate> {
    if services.is_admin(user_id) {
        return Ok(Gate::Pass);
    }
    let blocked = services
        .store
        .get_user(user_id)
        .await?
        .map(|user| user.blocked)
        .unwrap_or(false);
    let maintenance = services.admin.maintenance_mode().await?;
    Ok(evaluate(false, blocked, maintenance))
}

/// `Some(gate)` when the update must be stopped before any handler runs.
pub async fn stop_reason(services: Arc<Services>, user_id: UserId) -> Option<Gate> {
    match check(&services, user_id).await {
        Ok(Gate::Pass) => None,
        Ok(gate) => {
            log::debug!("update from user {} stopped: {:?}", user_id, gate);
            Some(gate)
        }
        Err(err) => {
            log::error!("guard check failed for user {}: {}", user_id, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admins_pass_everything() {
        assert_eq!(evaluate(true, true, true), Gate::Pass);
    }

    #[test]
    fn blocked_wins_over_maintenance() {
        assert_eq!(evaluate(false, true, true), Gate::Blocked);
        assert_eq!(evaluate(false, false, true), Gate::Maintenance);
        assert_eq!(evaluate(false, false, false), Gate::Pass);
    }
}
