use std::sync::Arc;

use super::admin::AdminService;
use super::approvals::ApprovalQueue;
use super::config::AppConfig;
use super::leaderboard::Leaderboards;
use super::ledger::LedgerEngine;
use super::payments::{DepositWatcher, Notifier};
use super::tasks::TaskRegistry;
use crate::infrastructure::database::LedgerStore;
use crate::infrastructure::gateway::PaymentGateway;

/// Everything the chat handlers reach for, shared through the dispatcher's dependency map.
pub struct Services {
    pub config: AppConfig,
    pub store: Arc<dyn LedgerStore>,
    pub engine: Arc<LedgerEngine>,
    pub tasks: Arc<TaskRegistry>,
    pub approvals: ApprovalQueue,
    pub deposits: Arc<DepositWatcher>,
    pub leaderboards: Leaderboards,
    pub admin: AdminService,
}

impl Services {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let engine = Arc::new(LedgerEngine::new(store.clone(), config.rewards.clone()));
        let tasks = Arc::new(TaskRegistry::new(store.clone()));
        let approvals = ApprovalQueue::new(store.clone(), engine.clone(), tasks.clone())
            .with_payouts(gateway.clone(), &config.payments.asset);
        let deposits = Arc::new(DepositWatcher::new(
            store.clone(),
            engine.clone(),
            gateway,
            notifier,
            config.payments.clone(),
        ));
        Self {
            leaderboards: Leaderboards::new(store.clone()),
            admin: AdminService::new(store.clone(), engine.clone(), config.admin_ids.clone()),
            config,
            store,
            engine,
            tasks,
            approvals,
            deposits,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.config.is_admin(user_id)
    }
}
