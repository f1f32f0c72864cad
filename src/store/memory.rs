//! In-memory store used by tests and local development.
//!
//! Implements the same [`DocumentStore`] surface as the real backend behind a
//! single mutex; the engine gets the store injected, so nothing here is
//! process-global.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Utc;

use super::{DocumentStore, FeeRecordUpdate, StoreError};
use crate::model::{Bid, BidStatus, ChatThread, FeeRecord, FeeStatus, Job, JobStatus, UserProfile};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    /// job id → bid id → bid.
    bids: HashMap<String, BTreeMap<String, Bid>>,
    chats: HashMap<String, ChatThread>,
    users: HashMap<String, UserProfile>,
    fees: HashMap<String, FeeRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    // Seeding helpers for the flows that create documents outside the
    // engine (posting a job, placing a bid).

    pub fn put_job(&self, job: &Job) {
        self.lock().jobs.insert(job.id.clone(), job.clone());
    }

    pub fn put_bid(&self, bid: &Bid) {
        self.lock()
            .bids
            .entry(bid.job_id.clone())
            .or_default()
            .insert(bid.id.clone(), bid.clone());
    }

    pub fn remove_bid(&self, job_id: &str, bid_id: &str) {
        if let Some(bids) = self.lock().bids.get_mut(job_id) {
            bids.remove(bid_id);
        }
    }

    pub fn set_accepted_bid(&self, job_id: &str, bid_id: &str) {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            job.accepted_bid = Some(bid_id.to_string());
            job.updated_at = Utc::now();
        }
    }

    pub fn chat_thread(&self, thread_id: &str) -> Option<ChatThread> {
        self.lock().chats.get(thread_id).cloned()
    }

    pub fn chat_thread_count(&self) -> usize {
        self.lock().chats.len()
    }
}

impl DocumentStore for MemoryStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(job_id).cloned())
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        if let Some(job) = self.lock().jobs.get_mut(job_id) {
            job.status = status;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_bid(&self, job_id: &str, bid_id: &str) -> Result<Option<Bid>, StoreError> {
        Ok(self
            .lock()
            .bids
            .get(job_id)
            .and_then(|bids| bids.get(bid_id))
            .cloned())
    }

    async fn list_bids(&self, job_id: &str) -> Result<Vec<Bid>, StoreError> {
        Ok(self
            .lock()
            .bids
            .get(job_id)
            .map(|bids| bids.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_bid_statuses(
        &self,
        job_id: &str,
        updates: &[(String, BidStatus)],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(bids) = inner.bids.get_mut(job_id) {
            for (bid_id, status) in updates {
                if let Some(bid) = bids.get_mut(bid_id) {
                    bid.status = *status;
                }
            }
        }
        Ok(())
    }

    async fn upsert_chat_thread(&self, thread: &ChatThread) -> Result<(), StoreError> {
        self.lock()
            .chats
            .insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    async fn put_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.lock().users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_billing_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), StoreError> {
        if let Some(user) = self.lock().users.get_mut(user_id) {
            user.billing_customer_id = Some(customer_id.to_string());
        }
        Ok(())
    }

    async fn create_fee_record(&self, record: &FeeRecord) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.fees.contains_key(&record.id) {
            return Ok(false);
        }
        inner.fees.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn get_fee_record(&self, record_id: &str) -> Result<Option<FeeRecord>, StoreError> {
        Ok(self.lock().fees.get(record_id).cloned())
    }

    async fn update_fee_record_if(
        &self,
        record_id: &str,
        expected: &[FeeStatus],
        update: &FeeRecordUpdate,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(record) = inner.fees.get_mut(record_id) else {
            return Ok(false);
        };
        if !expected.contains(&record.status) {
            return Ok(false);
        }
        record.status = update.status;
        record.attempts = update.attempts;
        record.last_attempt_at = Some(update.last_attempt_at);
        if let Some(receipt) = &update.customer_receipt {
            record.customer_receipt = Some(receipt.clone());
        }
        if let Some(receipt) = &update.provider_receipt {
            record.provider_receipt = Some(receipt.clone());
        }
        Ok(true)
    }

    async fn list_retryable_fee_records(
        &self,
        max_attempts: u32,
    ) -> Result<Vec<FeeRecord>, StoreError> {
        Ok(self
            .lock()
            .fees
            .values()
            .filter(|r| r.status == FeeStatus::Failed && r.attempts < max_attempts)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_record(job_id: &str, attempts: u32) -> FeeRecord {
        let mut record = FeeRecord::new(job_id, "cust", "prov", 10, 500);
        record.status = FeeStatus::Failed;
        record.attempts = attempts;
        record
    }

    #[tokio::test]
    async fn set_job_status_stamps_updated_at() {
        let store = MemoryStore::new();
        let job = Job::new("poster", "moving");
        store.put_job(&job);

        store
            .set_job_status(&job.id, JobStatus::PendingConfirmation)
            .await
            .unwrap();
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::PendingConfirmation);
        assert!(stored.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn batch_update_touches_only_named_bids() {
        let store = MemoryStore::new();
        let b1 = Bid::new("j1", "prov-1", 10_000);
        let b2 = Bid::new("j1", "prov-2", 12_000);
        let b3 = Bid::new("j2", "prov-1", 9_000);
        store.put_bid(&b1);
        store.put_bid(&b2);
        store.put_bid(&b3);

        store
            .update_bid_statuses(
                "j1",
                &[
                    (b1.id.clone(), BidStatus::Rejected),
                    (b2.id.clone(), BidStatus::Accepted),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_bid("j1", &b1.id).await.unwrap().unwrap().status,
            BidStatus::Rejected
        );
        assert_eq!(
            store.get_bid("j1", &b2.id).await.unwrap().unwrap().status,
            BidStatus::Accepted
        );
        assert_eq!(
            store.get_bid("j2", &b3.id).await.unwrap().unwrap().status,
            BidStatus::Pending
        );
    }

    #[tokio::test]
    async fn create_fee_record_is_create_if_absent() {
        let store = MemoryStore::new();
        let record = FeeRecord::new("j1", "cust", "prov", 10, 733);
        assert!(store.create_fee_record(&record).await.unwrap());
        assert!(!store.create_fee_record(&record).await.unwrap());
    }

    #[tokio::test]
    async fn cas_refuses_unexpected_status() {
        let store = MemoryStore::new();
        let mut record = FeeRecord::new("j1", "cust", "prov", 10, 733);
        record.status = FeeStatus::Charged;
        record.customer_receipt = Some("pi_1".into());
        store.create_fee_record(&record).await.unwrap();

        let update = FeeRecordUpdate {
            status: FeeStatus::Failed,
            attempts: 1,
            customer_receipt: None,
            provider_receipt: None,
            last_attempt_at: Utc::now(),
        };
        let applied = store
            .update_fee_record_if(&record.id, &[FeeStatus::Pending, FeeStatus::Failed], &update)
            .await
            .unwrap();
        assert!(!applied);
        let stored = store.get_fee_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FeeStatus::Charged);
        assert_eq!(stored.customer_receipt.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn cas_keeps_receipts_when_update_leaves_them_unset() {
        let store = MemoryStore::new();
        let mut record = FeeRecord::new("j1", "cust", "prov", 10, 733);
        record.status = FeeStatus::Failed;
        record.customer_receipt = Some("pi_kept".into());
        store.create_fee_record(&record).await.unwrap();

        let update = FeeRecordUpdate {
            status: FeeStatus::Failed,
            attempts: 2,
            customer_receipt: None,
            provider_receipt: None,
            last_attempt_at: Utc::now(),
        };
        assert!(
            store
                .update_fee_record_if(&record.id, &[FeeStatus::Failed], &update)
                .await
                .unwrap()
        );
        let stored = store.get_fee_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.customer_receipt.as_deref(), Some("pi_kept"));
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn retryable_query_excludes_ceiling_and_non_failed() {
        let store = MemoryStore::new();
        store.create_fee_record(&failed_record("j1", 2)).await.unwrap();
        store.create_fee_record(&failed_record("j2", 3)).await.unwrap();
        let pending = FeeRecord::new("j3", "cust", "prov", 10, 500);
        store.create_fee_record(&pending).await.unwrap();

        let eligible = store.list_retryable_fee_records(3).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].job_id, "j1");
    }

    #[tokio::test]
    async fn upsert_chat_thread_overwrites_same_id() {
        let store = MemoryStore::new();
        let first = ChatThread::between("j1", "alice", "bob");
        store.upsert_chat_thread(&first).await.unwrap();
        let second = ChatThread::between("j1", "bob", "alice");
        store.upsert_chat_thread(&second).await.unwrap();

        assert_eq!(store.chat_thread_count(), 1);
        let stored = store.chat_thread(&first.id).unwrap();
        assert_eq!(stored.last_activity, second.last_activity);
    }
}
