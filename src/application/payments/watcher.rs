use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::config::PaymentConfig;
use super::types::{DepositInvoice, InvoiceId, InvoiceStatus, TrackedInvoice};
use crate::application::error::{LedgerError, LedgerResult};
use crate::application::ledger::LedgerEngine;
use crate::application::ledger::types::UserId;
use crate::infrastructure::database::LedgerStore;
use crate::infrastructure::gateway::{GatewayInvoiceStatus, PaymentGateway};

#[derive(Clone, Debug, PartialEq)]
pub enum DepositEvent {
    Credited { invoice: DepositInvoice, balance: u64 },
    /// Expired or cancelled on the gateway side.
    Closed { invoice: DepositInvoice },
    /// Polling gave up before the invoice resolved.
    Lapsed { invoice: DepositInvoice },
}

/// Outbound channel for deposit outcomes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deposit_event(&self, event: DepositEvent);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polled: usize,
    pub credited: usize,
    pub closed: usize,
    pub lapsed: usize,
    pub errors: usize,
}

/// Owns the bounded set of outstanding invoices and polls them until each resolves.
pub struct DepositWatcher {
    store: Arc<dyn LedgerStore>,
    engine: Arc<LedgerEngine>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: PaymentConfig,
    tracked: Mutex<HashMap<InvoiceId, TrackedInvoice>>,
}

impl DepositWatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: Arc<LedgerEngine>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            engine,
            gateway,
            notifier,
            config,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a gateway invoice for a user-typed USDT amount and starts tracking it.
    /// Nothing touches the ledger here; the credit happens when the invoice is paid.
    pub async fn open_invoice(
        &self,
        user_id: UserId,
        amount_text: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<DepositInvoice> {
        let rewards = self.engine.config();
        let units = rewards.usdt_to_units(amount_text).ok_or_else(|| {
            LedgerError::InvalidInput(format!("'{}' is not a valid amount", amount_text.trim()))
        })?;
        if self.tracked_count() >= self.config.max_tracked {
            log::warn!("deposit tracking is full ({} invoices)", self.config.max_tracked);
            return Err(LedgerError::Storage(
                "too many open invoices, try again later".to_string(),
            ));
        }

        let amount_usdt = rewards.units_to_usdt(units);
        let created = self.gateway.create_invoice(user_id, &amount_usdt).await?;
        let invoice = DepositInvoice {
            invoice_id: created.invoice_id,
            user_id,
            amount_usdt,
            units,
            pay_url: created.pay_url,
            status: InvoiceStatus::Pending,
            created_at: now,
        };
        self.store.save_invoice(&invoice).await?;
        self.track(invoice.clone());
        log::info!(
            "invoice opened id={} user_id={} amount={} units={}",
            invoice.invoice_id,
            user_id,
            invoice.amount_usdt,
            units
        );
        Ok(invoice)
    }

    /// Returns `false` when the invoice is terminal, already tracked, or the set is full.
    pub fn track(&self, invoice: DepositInvoice) -> bool {
        if invoice.status.is_terminal() {
            return false;
        }
        let mut tracked = self.tracked.lock();
        if tracked.len() >= self.config.max_tracked || tracked.contains_key(&invoice.invoice_id) {
            return false;
        }
        tracked.insert(invoice.invoice_id, TrackedInvoice { invoice, attempts: 0 });
        true
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    #[cfg(test)]
    fn tracked(&self) -> Vec<TrackedInvoice> {
        self.tracked.lock().values().cloned().collect()
    }

    /// Picks up invoices persisted as pending by a previous run.
    pub async fn resume(&self) -> LedgerResult<usize> {
        let mut resumed = 0;
        for invoice in self.store.list_invoices().await? {
            if self.track(invoice) {
                resumed += 1;
            }
        }
        if resumed > 0 {
            log::info!("resumed tracking of {} pending invoices", resumed);
        }
        Ok(resumed)
    }

    pub async fn run(self: Arc<Self>) {
        log::info!(
            "Deposit watcher started, interval={:?} max_attempts={}",
            self.config.poll_interval,
            self.config.max_attempts
        );
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let report = self.poll_once().await;
            if report.polled > 0 {
                log::debug!("deposit poll {:?}", report);
            }
        }
    }

    pub async fn poll_once(&self) -> PollReport {
        let snapshot: Vec<DepositInvoice> = self
            .tracked
            .lock()
            .values()
            .map(|entry| entry.invoice.clone())
            .collect();

        let mut report = PollReport {
            polled: snapshot.len(),
            ..PollReport::default()
        };
        for invoice in snapshot {
            match self.gateway.get_invoice_status(invoice.invoice_id).await {
                Ok(GatewayInvoiceStatus::Paid) => {
                    let invoice_id = invoice.invoice_id;
                    match self.settle(invoice).await {
                        Ok(credited) => {
                            self.finish(invoice_id);
                            if credited {
                                report.credited += 1;
                            }
                        }
                        Err(err) => {
                            // Stays tracked; the next poll retries the credit.
                            report.errors += 1;
                            log::error!("deposit settlement for invoice {} failed: {}", invoice_id, err);
                        }
                    }
                }
                Ok(GatewayInvoiceStatus::Expired) => {
                    report.closed += 1;
                    self.close(invoice, InvoiceStatus::Expired).await;
                }
                Ok(GatewayInvoiceStatus::Cancelled) => {
                    report.closed += 1;
                    self.close(invoice, InvoiceStatus::Cancelled).await;
                }
                Ok(GatewayInvoiceStatus::Active) => {
                    if self.bump_attempts(&invoice) {
                        report.lapsed += 1;
                        self.close(invoice, InvoiceStatus::Lapsed).await;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    log::warn!("invoice {} status check failed: {}", invoice.invoice_id, err);
                    if self.bump_attempts(&invoice) {
                        report.lapsed += 1;
                        self.close(invoice, InvoiceStatus::Lapsed).await;
                    }
                }
            }
        }
        report
    }

    /// Counts one poll. Returns `true` when the attempt budget is spent.
    fn bump_attempts(&self, invoice: &DepositInvoice) -> bool {
        let mut tracked = self.tracked.lock();
        match tracked.get_mut(&invoice.invoice_id) {
            Some(entry) => {
                entry.attempts += 1;
                entry.attempts >= self.config.max_attempts
            }
            None => false,
        }
    }

    fn finish(&self, invoice_id: InvoiceId) {
        self.tracked.lock().remove(&invoice_id);
    }

    async fn settle(&self, mut invoice: DepositInvoice) -> LedgerResult<bool> {
        let credited = self.engine.settle_deposit(&invoice).await?;
        invoice.status = InvoiceStatus::Paid;
        if let Err(err) = self.store.save_invoice(&invoice).await {
            log::warn!("failed to persist paid invoice {}: {}", invoice.invoice_id, err);
        }
        match credited {
            Some(balance) => {
                self.notifier
                    .deposit_event(DepositEvent::Credited { invoice, balance })
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&self, mut invoice: DepositInvoice, status: InvoiceStatus) {
        self.finish(invoice.invoice_id);
        invoice.status = status;
        if let Err(err) = self.store.save_invoice(&invoice).await {
            log::warn!("failed to persist invoice {}: {}", invoice.invoice_id, err);
        }
        log::info!(
            "invoice closed id={} user_id={} status={:?}",
            invoice.invoice_id,
            invoice.user_id,
            status
        );
        let event = if status == InvoiceStatus::Lapsed {
            DepositEvent::Lapsed { invoice }
        } else {
            DepositEvent::Closed { invoice }
        };
        self.notifier.deposit_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::config::RewardConfig;
    use crate::infrastructure::database::MemoryStore;
    use crate::infrastructure::gateway::{CreatedInvoice, GatewayError, PayoutCheck};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    struct FakeGateway {
        next_id: AtomicI64,
        statuses: Mutex<HashMap<InvoiceId, GatewayInvoiceStatus>>,
        fail_create: bool,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(100),
                statuses: Mutex::new(HashMap::new()),
                fail_create: false,
            }
        }

        fn set(&self, id: InvoiceId, status: GatewayInvoiceStatus) {
            self.statuses.lock().insert(id, status);
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_invoice(&self, _: i64, _: &str) -> Result<CreatedInvoice, GatewayError> {
            if self.fail_create {
                return Err(GatewayError::Status(502));
            }
            let invoice_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.set(invoice_id, GatewayInvoiceStatus::Active);
            Ok(CreatedInvoice {
                invoice_id,
                pay_url: format!("https://t.me/CryptoBot?start=IV{}", invoice_id),
            })
        }

        async fn get_invoice_status(
            &self,
            invoice_id: i64,
        ) -> Result<GatewayInvoiceStatus, GatewayError> {
            self.statuses
                .lock()
                .get(&invoice_id)
                .copied()
                .ok_or_else(|| GatewayError::Malformed("unknown invoice".to_string()))
        }

        async fn create_payout_check(&self, _: i64, _: &str) -> Result<PayoutCheck, GatewayError> {
            Err(GatewayError::Api("UNSUPPORTED".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<DepositEvent>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deposit_event(&self, event: DepositEvent) {
            self.events.lock().push(event);
        }
    }

    struct Harness {
        store: Arc<dyn LedgerStore>,
        engine: Arc<LedgerEngine>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<RecordingNotifier>,
        watcher: DepositWatcher,
    }

    fn harness_with(gateway: FakeGateway, max_attempts: u32, max_tracked: usize) -> Harness {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let engine = Arc::new(LedgerEngine::new(store.clone(), RewardConfig::default()));
        let gateway = Arc::new(gateway);
        let notifier = Arc::new(RecordingNotifier::default());
        let config = PaymentConfig {
            api_url: "http://localhost".to_string(),
            token: "token".to_string(),
            asset: "USDT".to_string(),
            poll_interval: Duration::from_millis(10),
            max_attempts,
            timeout: Duration::from_secs(1),
            max_tracked,
        };
        let watcher = DepositWatcher::new(
            store.clone(),
            engine.clone(),
            gateway.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            store,
            engine,
            gateway,
            notifier,
            watcher,
        }
    }

    async fn harness() -> Harness {
        let h = harness_with(FakeGateway::new(), 3, 100);
        h.engine.register(1, None, None, Utc::now()).await.unwrap();
        h
    }

    #[tokio::test]
    async fn paid_invoice_credits_once_even_if_seen_twice() {
        let h = harness().await;
        let invoice = h.watcher.open_invoice(1, "1,5", Utc::now()).await.unwrap();
        assert_eq!(invoice.units, 150);
        assert_eq!(invoice.amount_usdt, "1.50");
        assert_eq!(h.engine.user(1).await.unwrap().balance, 0);

        h.gateway.set(invoice.invoice_id, GatewayInvoiceStatus::Paid);
        let report = h.watcher.poll_once().await;
        assert_eq!(report.credited, 1);
        assert_eq!(h.watcher.tracked_count(), 0);

        // Seen paid again, e.g. after a restart re-tracked it.
        assert!(h.watcher.track(invoice.clone()));
        let report = h.watcher.poll_once().await;
        assert_eq!(report.credited, 0);
        assert_eq!(h.engine.user(1).await.unwrap().balance, 150);

        let stored = h.store.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(h.notifier.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn failed_credit_keeps_invoice_tracked_for_retry() {
        let h = harness().await;
        // Paid by someone the ledger cannot credit yet.
        let invoice = DepositInvoice {
            invoice_id: 900,
            user_id: 9,
            amount_usdt: "3.00".to_string(),
            units: 300,
            pay_url: "https://t.me/CryptoBot?start=IV900".to_string(),
            status: InvoiceStatus::Pending,
            created_at: Utc::now(),
        };
        assert!(h.watcher.track(invoice.clone()));
        h.gateway.set(invoice.invoice_id, GatewayInvoiceStatus::Paid);

        let report = h.watcher.poll_once().await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.credited, 0);
        assert_eq!(h.watcher.tracked_count(), 1);
        assert!(h.notifier.events.lock().is_empty());

        h.engine.register(9, None, None, Utc::now()).await.unwrap();
        let report = h.watcher.poll_once().await;
        assert_eq!(report.credited, 1);
        assert_eq!(h.watcher.tracked_count(), 0);
        assert_eq!(h.engine.user(9).await.unwrap().balance, 300);
    }

    #[tokio::test]
    async fn expired_invoice_stops_polling_without_credit() {
        let h = harness().await;
        let invoice = h.watcher.open_invoice(1, "2", Utc::now()).await.unwrap();
        h.gateway.set(invoice.invoice_id, GatewayInvoiceStatus::Expired);

        let report = h.watcher.poll_once().await;
        assert_eq!(report.closed, 1);
        assert_eq!(h.watcher.tracked_count(), 0);
        assert_eq!(h.engine.user(1).await.unwrap().balance, 0);
        assert!(matches!(
            h.notifier.events.lock()[0],
            DepositEvent::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn unresolved_invoice_lapses_after_max_attempts() {
        let h = harness().await;
        let invoice = h.watcher.open_invoice(1, "0.10", Utc::now()).await.unwrap();

        for _ in 0..2 {
            assert_eq!(h.watcher.poll_once().await.lapsed, 0);
        }
        assert_eq!(h.watcher.tracked()[0].attempts, 2);
        assert_eq!(h.watcher.poll_once().await.lapsed, 1);
        assert_eq!(h.watcher.tracked_count(), 0);

        let stored = h.store.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Lapsed);
        assert!(matches!(
            h.notifier.events.lock()[0],
            DepositEvent::Lapsed { .. }
        ));
    }

    #[tokio::test]
    async fn invalid_amount_and_gateway_failure_leave_no_trace() {
        let mut gateway = FakeGateway::new();
        gateway.fail_create = true;
        let h = harness_with(gateway, 3, 100);
        h.engine.register(1, None, None, Utc::now()).await.unwrap();

        assert!(matches!(
            h.watcher.open_invoice(1, "abc", Utc::now()).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            h.watcher.open_invoice(1, "5", Utc::now()).await,
            Err(LedgerError::Gateway(_))
        ));
        assert_eq!(h.watcher.tracked_count(), 0);
        assert!(h.store.list_invoices().await.unwrap().is_empty());
        assert_eq!(h.engine.user(1).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn tracking_is_bounded_and_resume_skips_terminal_invoices() {
        let h = harness_with(FakeGateway::new(), 3, 1);
        h.engine.register(1, None, None, Utc::now()).await.unwrap();
        h.watcher.open_invoice(1, "1", Utc::now()).await.unwrap();
        assert!(matches!(
            h.watcher.open_invoice(1, "1", Utc::now()).await,
            Err(LedgerError::Storage(_))
        ));

        let mut done = h.watcher.tracked()[0].invoice.clone();
        done.invoice_id = 9;
        done.status = InvoiceStatus::Paid;
        h.store.save_invoice(&done).await.unwrap();

        let fresh = harness_with(FakeGateway::new(), 3, 10);
        for invoice in h.store.list_invoices().await.unwrap() {
            fresh.store.save_invoice(&invoice).await.unwrap();
        }
        assert_eq!(fresh.watcher.resume().await.unwrap(), 1);
    }
}
