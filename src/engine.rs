//! The lifecycle workflow engine.
//!
//! A set of stateless reaction handlers over the document store and the
//! payment gateway. The host delivers events at least once and may run
//! handlers for the same job or fee record concurrently, so every handler is
//! either naturally idempotent or guarded by a compare-and-set on status.
//! The engine holds no durable state of its own; each invocation re-reads
//! whatever context it needs.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::BidflowError;
use crate::events::Event;
use crate::fees::FeeSchedule;
use crate::model::{BidStatus, ChatThread, FeeRecord, FeeStatus, Job, JobStatus, UserProfile};
use crate::payments::{ChargeRequest, CustomerRequest, PaymentError, PaymentGateway};
use crate::store::{DocumentStore, FeeRecordUpdate, StoreError};

/// Which party of a job a fee charge targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Customer,
    Provider,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::Customer => "customer",
            Side::Provider => "provider",
        }
    }
}

/// Per-side settlement failure. Store and configuration problems abort the
/// whole routine; everything else marks the record failed for the sweep.
enum SideError {
    Store(StoreError),
    Payment(PaymentError),
    MissingUser(String),
}

pub struct WorkflowEngine<S, P> {
    pub store: S,
    pub gateway: P,
    pub fees: FeeSchedule,
    pub currency: String,
    /// Attempt ceiling for the retry sweep; records at the ceiling stay
    /// failed until an operator steps in.
    pub max_attempts: u32,
}

impl<S: DocumentStore, P: PaymentGateway> WorkflowEngine<S, P> {
    pub fn new(store: S, gateway: P) -> Self {
        Self::with_settings(store, gateway, FeeSchedule::default(), "usd".to_string(), 3)
    }

    pub fn with_settings(
        store: S,
        gateway: P,
        fees: FeeSchedule,
        currency: String,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            gateway,
            fees,
            currency,
            max_attempts,
        }
    }

    /// Route one event to its reaction handler.
    pub async fn dispatch(&self, event: Event) -> Result<(), BidflowError> {
        match event {
            Event::UserCreated {
                user_id,
                email,
                display_name,
            } => self.scaffold_profile(&user_id, &email, &display_name).await,
            Event::JobUpdated { before, after } => self.on_job_updated(&before, &after).await,
            Event::ScheduleTick => self.run_retry_sweep().await,
        }
    }

    /// Decide which reactions a job-document change triggers. Unrelated field
    /// edits fall through both guards and are no-ops.
    async fn on_job_updated(&self, before: &Job, after: &Job) -> Result<(), BidflowError> {
        if after.accepted_bid.is_some() && after.accepted_bid != before.accepted_bid {
            self.handle_bid_accepted(after).await?;
        }
        if before.status != JobStatus::Completed && after.status == JobStatus::Completed {
            self.handle_job_completed(after).await?;
        }
        Ok(())
    }

    /// On-user-created hook: scaffold a default profile once. Duplicate
    /// deliveries find the profile in place and leave it alone.
    async fn scaffold_profile(
        &self,
        user_id: &str,
        email: &str,
        display_name: &str,
    ) -> Result<(), BidflowError> {
        if self.store.get_user(user_id).await?.is_some() {
            debug!(user_id, "profile already scaffolded");
            return Ok(());
        }
        let profile = UserProfile::scaffold(user_id, email, display_name);
        self.store.put_user(&profile).await?;
        info!(user_id, "scaffolded default profile");
        Ok(())
    }

    /// Bid-acceptance reaction: move the job to pending-confirmation, accept
    /// the chosen bid, reject its siblings, and provision the chat thread.
    ///
    /// The status write and the bid batch are separate commits; readers can
    /// briefly observe the job pending-confirmation with bid statuses still
    /// pending. If the accepted bid vanished between the event and the read,
    /// the remaining effects are skipped and the status change stands.
    async fn handle_bid_accepted(&self, job: &Job) -> Result<(), BidflowError> {
        let Some(bid_id) = job.accepted_bid.as_deref() else {
            return Ok(());
        };

        self.store
            .set_job_status(&job.id, JobStatus::PendingConfirmation)
            .await?;

        let Some(accepted) = self.store.get_bid(&job.id, bid_id).await? else {
            warn!(
                job_id = %job.id,
                bid_id,
                "accepted bid is gone; job left pending-confirmation without bid/chat effects"
            );
            return Ok(());
        };

        let bids = self.store.list_bids(&job.id).await?;
        let updates: Vec<(String, BidStatus)> = bids
            .iter()
            .map(|bid| {
                let status = if bid.id == bid_id {
                    BidStatus::Accepted
                } else {
                    BidStatus::Rejected
                };
                (bid.id.clone(), status)
            })
            .collect();
        self.store.update_bid_statuses(&job.id, &updates).await?;

        let thread = ChatThread::between(&job.id, &job.poster_id, &accepted.provider_id);
        self.store.upsert_chat_thread(&thread).await?;

        info!(
            job_id = %job.id,
            bid_id,
            provider_id = %accepted.provider_id,
            rejected = updates.len() - 1,
            "bid accepted"
        );
        Ok(())
    }

    /// Completion reaction: compute both sides' fees from the accepted bid,
    /// open the ledger entry, and settle it synchronously.
    ///
    /// The record id is derived from the job id, so a duplicate completion
    /// delivery finds the entry already created and just re-runs the (safe)
    /// settlement.
    async fn handle_job_completed(&self, job: &Job) -> Result<(), BidflowError> {
        let Some(bid_id) = job.accepted_bid.as_deref() else {
            warn!(job_id = %job.id, "job completed without an accepted bid; nothing to settle");
            return Ok(());
        };
        let Some(bid) = self.store.get_bid(&job.id, bid_id).await? else {
            warn!(job_id = %job.id, bid_id, "accepted bid is gone; cannot compute fees");
            return Ok(());
        };

        let per_side = self.fees.per_side(bid.amount);
        let record = FeeRecord::new(
            &job.id,
            &job.poster_id,
            &bid.provider_id,
            self.fees.percent,
            per_side,
        );
        let created = self.store.create_fee_record(&record).await?;
        if created {
            info!(
                job_id = %job.id,
                record_id = %record.id,
                per_side,
                "fee record opened"
            );
        } else {
            debug!(record_id = %record.id, "fee record already exists for this job");
        }

        self.settle(&record.id).await
    }

    /// Dual-charge settlement routine. Safe to invoke concurrently with
    /// itself (completion reaction vs. retry sweep): the terminal write is a
    /// compare-and-set that never moves a record out of `charged`, and a side
    /// that already holds a receipt is not charged again.
    pub async fn settle(&self, record_id: &str) -> Result<(), BidflowError> {
        let Some(record) = self.store.get_fee_record(record_id).await? else {
            warn!(record_id, "fee record not found; skipping settlement");
            return Ok(());
        };
        if record.status == FeeStatus::Charged {
            debug!(record_id, "fee record already charged");
            return Ok(());
        }

        let (customer_result, provider_result) = tokio::join!(
            self.charge_side(&record, Side::Customer),
            self.charge_side(&record, Side::Provider),
        );

        let mut update = FeeRecordUpdate {
            status: FeeStatus::Charged,
            attempts: record.attempts + 1,
            customer_receipt: None,
            provider_receipt: None,
            last_attempt_at: Utc::now(),
        };
        let customer_failed =
            fold_side(&record, Side::Customer, customer_result, &mut update.customer_receipt)?;
        let provider_failed =
            fold_side(&record, Side::Provider, provider_result, &mut update.provider_receipt)?;
        if customer_failed || provider_failed {
            // One side may have captured; its receipt is kept so the sweep
            // only re-charges the side that failed. The captured charge is
            // not reversed.
            update.status = FeeStatus::Failed;
        }

        let applied = self
            .store
            .update_fee_record_if(
                record_id,
                &[FeeStatus::Pending, FeeStatus::Failed],
                &update,
            )
            .await?;
        if !applied {
            info!(record_id, "concurrent settlement already concluded; leaving record as-is");
            return Ok(());
        }

        match update.status {
            FeeStatus::Charged => info!(record_id, attempts = update.attempts, "fees captured"),
            _ => warn!(record_id, attempts = update.attempts, "settlement failed"),
        }
        Ok(())
    }

    /// Capture one side's fee, provisioning a gateway customer for the user
    /// first if none is on file. A side with a stored receipt is skipped.
    async fn charge_side(&self, record: &FeeRecord, side: Side) -> Result<String, SideError> {
        let (user_id, amount, existing) = match side {
            Side::Customer => (
                &record.customer_id,
                record.customer_amount,
                &record.customer_receipt,
            ),
            Side::Provider => (
                &record.provider_id,
                record.provider_amount,
                &record.provider_receipt,
            ),
        };
        if let Some(receipt) = existing {
            debug!(record_id = %record.id, role = side.as_str(), "side already captured");
            return Ok(receipt.clone());
        }

        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(SideError::Store)?
            .ok_or_else(|| SideError::MissingUser(user_id.clone()))?;

        let gateway_customer = match &user.billing_customer_id {
            Some(id) => id.clone(),
            None => {
                let customer = self
                    .gateway
                    .create_customer(&CustomerRequest {
                        email: user.email.clone(),
                        name: user.display_name.clone(),
                        metadata: BTreeMap::from([("user_id".to_string(), user.id.clone())]),
                    })
                    .await
                    .map_err(SideError::Payment)?;
                self.store
                    .set_billing_customer_id(user_id, &customer.id)
                    .await
                    .map_err(SideError::Store)?;
                customer.id
            }
        };

        let charge = self
            .gateway
            .charge(&ChargeRequest {
                customer_id: gateway_customer,
                amount,
                currency: self.currency.clone(),
                metadata: BTreeMap::from([
                    ("role".to_string(), side.as_str().to_string()),
                    ("job_id".to_string(), record.job_id.clone()),
                    ("fee_record_id".to_string(), record.id.clone()),
                ]),
                idempotency_key: format!("{}:{}", record.id, side.as_str()),
            })
            .await
            .map_err(SideError::Payment)?;
        Ok(charge.id)
    }

    /// Retry sweep: settle every failed record below the attempt ceiling.
    /// Records are settled in parallel and independently; one failure never
    /// blocks the rest.
    pub async fn run_retry_sweep(&self) -> Result<(), BidflowError> {
        let records = self.store.list_retryable_fee_records(self.max_attempts).await?;
        if records.is_empty() {
            debug!("retry sweep: nothing to do");
            return Ok(());
        }
        info!(count = records.len(), "retry sweep starting");

        let results = join_all(records.iter().map(|record| self.settle(&record.id))).await;

        let mut hard_error = None;
        for (record, result) in records.iter().zip(results) {
            if let Err(e) = result {
                warn!(record_id = %record.id, error = %e, "retry settlement errored");
                hard_error.get_or_insert(e);
            }
        }
        match hard_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fold one side's charge result into the pending record update. Returns
/// whether the side failed; store and configuration errors propagate.
fn fold_side(
    record: &FeeRecord,
    side: Side,
    result: Result<String, SideError>,
    receipt: &mut Option<String>,
) -> Result<bool, BidflowError> {
    match result {
        Ok(id) => {
            *receipt = Some(id);
            Ok(false)
        }
        Err(SideError::Store(e)) => Err(e.into()),
        Err(SideError::Payment(e)) if e.is_configuration() => Err(e.into()),
        Err(SideError::Payment(e)) => {
            warn!(record_id = %record.id, role = side.as_str(), error = %e, "charge failed");
            Ok(true)
        }
        Err(SideError::MissingUser(user_id)) => {
            warn!(record_id = %record.id, role = side.as_str(), user_id = %user_id, "user not found");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::model::Bid;
    use crate::payments::{Charge, Customer};
    use crate::store::MemoryStore;

    /// In-memory gateway that records every request and can be told to
    /// decline one role's charges.
    #[derive(Default)]
    struct MockGateway {
        charges: Mutex<Vec<ChargeRequest>>,
        customers: Mutex<Vec<CustomerRequest>>,
        declined_roles: Mutex<HashSet<String>>,
        not_configured: bool,
    }

    impl MockGateway {
        fn decline_role(&self, role: &str) {
            self.declined_roles
                .lock()
                .unwrap()
                .insert(role.to_string());
        }

        fn clear_declines(&self) {
            self.declined_roles.lock().unwrap().clear();
        }

        fn charge_count(&self) -> usize {
            self.charges.lock().unwrap().len()
        }

        fn charge_requests(&self) -> Vec<ChargeRequest> {
            self.charges.lock().unwrap().clone()
        }
    }

    impl PaymentGateway for MockGateway {
        async fn create_customer(
            &self,
            req: &CustomerRequest,
        ) -> Result<Customer, PaymentError> {
            if self.not_configured {
                return Err(PaymentError::NotConfigured);
            }
            let mut customers = self.customers.lock().unwrap();
            customers.push(req.clone());
            Ok(Customer {
                id: format!("cus_{}", customers.len()),
            })
        }

        async fn charge(&self, req: &ChargeRequest) -> Result<Charge, PaymentError> {
            if self.not_configured {
                return Err(PaymentError::NotConfigured);
            }
            let role = req.metadata.get("role").cloned().unwrap_or_default();
            let mut charges = self.charges.lock().unwrap();
            charges.push(req.clone());
            if self.declined_roles.lock().unwrap().contains(&role) {
                return Err(PaymentError::Declined {
                    message: format!("{role} card declined"),
                });
            }
            Ok(Charge {
                id: format!("pi_{}", charges.len()),
                status: "succeeded".into(),
            })
        }
    }

    fn engine() -> WorkflowEngine<MemoryStore, MockGateway> {
        WorkflowEngine::new(MemoryStore::new(), MockGateway::default())
    }

    async fn seed_user(engine: &WorkflowEngine<MemoryStore, MockGateway>, id: &str) {
        engine
            .store
            .put_user(&UserProfile::scaffold(id, &format!("{id}@example.com"), id))
            .await
            .unwrap();
    }

    /// Job J1 with bids B1 ($100) and B2 ($120); returns (job, b1, b2).
    async fn seed_marketplace(
        engine: &WorkflowEngine<MemoryStore, MockGateway>,
    ) -> (Job, Bid, Bid) {
        let mut job = Job::new("u-poster", "painting");
        job.id = "j1".into();
        let mut b1 = Bid::new("j1", "u-prov-1", 10_000);
        b1.id = "b1".into();
        let mut b2 = Bid::new("j1", "u-prov-2", 12_000);
        b2.id = "b2".into();
        engine.store.put_job(&job);
        engine.store.put_bid(&b1);
        engine.store.put_bid(&b2);
        seed_user(engine, "u-poster").await;
        seed_user(engine, "u-prov-1").await;
        seed_user(engine, "u-prov-2").await;
        (job, b1, b2)
    }

    fn accepted(job: &Job, bid_id: &str) -> Job {
        let mut after = job.clone();
        after.accepted_bid = Some(bid_id.to_string());
        after
    }

    fn completed(job: &Job, bid_id: &str) -> (Job, Job) {
        let mut before = job.clone();
        before.status = JobStatus::Working;
        before.accepted_bid = Some(bid_id.to_string());
        let mut after = before.clone();
        after.status = JobStatus::Completed;
        (before, after)
    }

    #[tokio::test]
    async fn acceptance_transitions_job_bids_and_chat() {
        let engine = engine();
        let (job, b1, b2) = seed_marketplace(&engine).await;

        let after = accepted(&job, "b2");
        engine
            .dispatch(Event::JobUpdated {
                before: job.clone(),
                after,
            })
            .await
            .unwrap();

        let stored = engine.store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::PendingConfirmation);
        assert_eq!(
            engine.store.get_bid("j1", &b1.id).await.unwrap().unwrap().status,
            BidStatus::Rejected
        );
        assert_eq!(
            engine.store.get_bid("j1", &b2.id).await.unwrap().unwrap().status,
            BidStatus::Accepted
        );

        assert_eq!(engine.store.chat_thread_count(), 1);
        let thread_id = ChatThread::thread_id("j1", "u-poster", "u-prov-2");
        let thread = engine.store.chat_thread(&thread_id).unwrap();
        assert_eq!(
            thread.participants,
            ["u-poster".to_string(), "u-prov-2".to_string()]
        );
    }

    #[tokio::test]
    async fn acceptance_twice_creates_one_thread() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;

        let after = accepted(&job, "b2");
        for _ in 0..2 {
            engine
                .dispatch(Event::JobUpdated {
                    before: job.clone(),
                    after: after.clone(),
                })
                .await
                .unwrap();
        }
        assert_eq!(engine.store.chat_thread_count(), 1);
    }

    #[tokio::test]
    async fn unrelated_job_edit_is_a_no_op() {
        let engine = engine();
        let (job, b1, _) = seed_marketplace(&engine).await;

        let mut after = job.clone();
        after.category = "decorating".into();
        engine
            .dispatch(Event::JobUpdated { before: job, after })
            .await
            .unwrap();

        let stored = engine.store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Open);
        assert_eq!(
            engine.store.get_bid("j1", &b1.id).await.unwrap().unwrap().status,
            BidStatus::Pending
        );
        assert_eq!(engine.store.chat_thread_count(), 0);
    }

    #[tokio::test]
    async fn vanished_accepted_bid_leaves_status_but_skips_side_effects() {
        let engine = engine();
        let (job, b1, _) = seed_marketplace(&engine).await;
        engine.store.remove_bid("j1", "b2");

        let after = accepted(&job, "b2");
        engine
            .dispatch(Event::JobUpdated { before: job, after })
            .await
            .unwrap();

        // Status write had already committed; the rest was skipped.
        let stored = engine.store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::PendingConfirmation);
        assert_eq!(
            engine.store.get_bid("j1", &b1.id).await.unwrap().unwrap().status,
            BidStatus::Pending
        );
        assert_eq!(engine.store.chat_thread_count(), 0);
    }

    #[tokio::test]
    async fn completion_charges_both_sides_ten_percent() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;

        let (before, after) = completed(&job, "b2");
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();

        let record = engine
            .store
            .get_fee_record(&FeeRecord::record_id("j1"))
            .await
            .unwrap()
            .unwrap();
        // $120 bid: $12.00 per side.
        assert_eq!(record.customer_amount, 1200);
        assert_eq!(record.provider_amount, 1200);
        assert_eq!(record.status, FeeStatus::Charged);
        assert_eq!(record.attempts, 1);
        assert!(record.customer_receipt.is_some());
        assert!(record.provider_receipt.is_some());
        assert!(record.last_attempt_at.is_some());

        let requests = engine.gateway.charge_requests();
        assert_eq!(requests.len(), 2);
        let keys: HashSet<String> =
            requests.iter().map(|r| r.idempotency_key.clone()).collect();
        assert!(keys.contains("fee_j1:customer"));
        assert!(keys.contains("fee_j1:provider"));
        for req in &requests {
            assert_eq!(req.metadata["job_id"], "j1");
            assert_eq!(req.metadata["fee_record_id"], "fee_j1");
            assert_eq!(req.currency, "usd");
        }
    }

    #[tokio::test]
    async fn fee_rounds_half_up_per_side() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;
        // $73.33 bid: 733.3 cents rounds to $7.33 per side, $14.66 total.
        let mut odd = Bid::new("j1", "u-prov-2", 7333);
        odd.id = "b3".into();
        engine.store.put_bid(&odd);

        let (before, after) = completed(&job, "b3");
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();

        let record = engine
            .store
            .get_fee_record(&FeeRecord::record_id("j1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.customer_amount, 733);
        assert_eq!(record.provider_amount, 733);
        assert_eq!(record.customer_amount + record.provider_amount, 1466);
    }

    #[tokio::test]
    async fn duplicate_completion_delivery_does_not_recharge() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;

        let (before, after) = completed(&job, "b2");
        engine
            .dispatch(Event::JobUpdated {
                before: before.clone(),
                after: after.clone(),
            })
            .await
            .unwrap();
        assert_eq!(engine.gateway.charge_count(), 2);

        // Same event delivered again: record exists and is charged.
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();
        assert_eq!(engine.gateway.charge_count(), 2);

        // Already-completed before-state is guarded even earlier.
        let mut done = job.clone();
        done.status = JobStatus::Completed;
        done.accepted_bid = Some("b2".into());
        engine
            .dispatch(Event::JobUpdated {
                before: done.clone(),
                after: done,
            })
            .await
            .unwrap();
        assert_eq!(engine.gateway.charge_count(), 2);
    }

    #[tokio::test]
    async fn completion_without_accepted_bid_is_a_no_op() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;

        let mut before = job.clone();
        before.status = JobStatus::Working;
        let mut after = before.clone();
        after.status = JobStatus::Completed;
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();

        assert!(
            engine
                .store
                .get_fee_record(&FeeRecord::record_id("j1"))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(engine.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn declined_side_marks_record_failed_and_keeps_other_receipt() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;
        engine.gateway.decline_role("provider");

        let (before, after) = completed(&job, "b2");
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();

        let record = engine
            .store
            .get_fee_record(&FeeRecord::record_id("j1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FeeStatus::Failed);
        assert_eq!(record.attempts, 1);
        // The customer capture stands (not reversed) and its receipt is kept.
        assert!(record.customer_receipt.is_some());
        assert!(record.provider_receipt.is_none());
    }

    #[tokio::test]
    async fn retry_sweep_recharges_only_the_failed_side() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;
        engine.gateway.decline_role("provider");

        let (before, after) = completed(&job, "b2");
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();
        assert_eq!(engine.gateway.charge_count(), 2);

        engine.gateway.clear_declines();
        engine.dispatch(Event::ScheduleTick).await.unwrap();

        let record = engine
            .store
            .get_fee_record(&FeeRecord::record_id("j1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FeeStatus::Charged);
        assert_eq!(record.attempts, 2);
        assert!(record.customer_receipt.is_some());
        assert!(record.provider_receipt.is_some());

        // One extra charge for the provider side only.
        assert_eq!(engine.gateway.charge_count(), 3);
        let last = engine.gateway.charge_requests().pop().unwrap();
        assert_eq!(last.metadata["role"], "provider");
    }

    #[tokio::test]
    async fn settling_a_charged_record_issues_no_charges() {
        let engine = engine();
        seed_marketplace(&engine).await;
        let mut record = FeeRecord::new("j1", "u-poster", "u-prov-2", 10, 1200);
        record.status = FeeStatus::Charged;
        record.attempts = 1;
        record.customer_receipt = Some("pi_a".into());
        record.provider_receipt = Some("pi_b".into());
        engine.store.create_fee_record(&record).await.unwrap();

        engine.settle(&record.id).await.unwrap();
        engine.settle(&record.id).await.unwrap();

        assert_eq!(engine.gateway.charge_count(), 0);
        let stored = engine.store.get_fee_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.customer_receipt.as_deref(), Some("pi_a"));
        assert_eq!(stored.provider_receipt.as_deref(), Some("pi_b"));
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn sweep_skips_records_at_the_attempt_ceiling() {
        let engine = engine();
        seed_marketplace(&engine).await;
        let mut stuck = FeeRecord::new("j1", "u-poster", "u-prov-2", 10, 1200);
        stuck.status = FeeStatus::Failed;
        stuck.attempts = 3;
        engine.store.create_fee_record(&stuck).await.unwrap();

        engine.dispatch(Event::ScheduleTick).await.unwrap();

        assert_eq!(engine.gateway.charge_count(), 0);
        let stored = engine.store.get_fee_record(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FeeStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn lazy_customer_provisioning_persists_the_mapping() {
        let engine = engine();
        let (job, _, _) = seed_marketplace(&engine).await;

        let (before, after) = completed(&job, "b2");
        engine
            .dispatch(Event::JobUpdated { before, after })
            .await
            .unwrap();

        // Both parties got a gateway customer on first settlement.
        assert_eq!(engine.gateway.customers.lock().unwrap().len(), 2);
        let poster = engine.store.get_user("u-poster").await.unwrap().unwrap();
        assert!(poster.billing_customer_id.is_some());
        let provider = engine.store.get_user("u-prov-2").await.unwrap().unwrap();
        assert!(provider.billing_customer_id.is_some());
    }

    #[tokio::test]
    async fn unconfigured_gateway_is_a_hard_failure() {
        let mut gateway = MockGateway::default();
        gateway.not_configured = true;
        let engine = WorkflowEngine::new(MemoryStore::new(), gateway);
        let mut job = Job::new("u-poster", "painting");
        job.id = "j1".into();
        engine.store.put_job(&job);
        let mut bid = Bid::new("j1", "u-prov-2", 12_000);
        bid.id = "b2".into();
        engine.store.put_bid(&bid);
        seed_user(&engine, "u-poster").await;
        seed_user(&engine, "u-prov-2").await;

        let (before, after) = completed(&job, "b2");
        let result = engine.dispatch(Event::JobUpdated { before, after }).await;
        assert!(matches!(
            result,
            Err(BidflowError::Payment(PaymentError::NotConfigured))
        ));

        // The record is not marked failed: nothing for the sweep to retry.
        let record = engine
            .store
            .get_fee_record(&FeeRecord::record_id("j1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FeeStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn user_created_scaffolds_once() {
        let engine = engine();
        let event = Event::UserCreated {
            user_id: "u-new".into(),
            email: "new@example.com".into(),
            display_name: "New User".into(),
        };
        engine.dispatch(event.clone()).await.unwrap();

        let profile = engine.store.get_user("u-new").await.unwrap().unwrap();
        assert_eq!(profile.email, "new@example.com");
        assert!(!profile.has_payment_method);
        assert!(profile.billing_customer_id.is_none());

        // Duplicate delivery leaves the existing profile untouched.
        engine
            .store
            .set_billing_customer_id("u-new", "cus_kept")
            .await
            .unwrap();
        engine.dispatch(event).await.unwrap();
        let profile = engine.store.get_user("u-new").await.unwrap().unwrap();
        assert_eq!(profile.billing_customer_id.as_deref(), Some("cus_kept"));
    }
}
