pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Bid, BidStatus, ChatThread, FeeRecord, FeeStatus, Job, JobStatus, UserProfile};

/// Errors surfaced by a document-store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store returned an error response.
    #[error("store error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Underlying network failure (DNS, connection refused, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A document could not be decoded into its domain type.
    #[error("failed to decode document {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Fields the settlement routine writes back onto a fee record in one
/// conditional update. Receipts are only ever set, never cleared; a `None`
/// here leaves the stored value alone.
#[derive(Debug, Clone)]
pub struct FeeRecordUpdate {
    pub status: FeeStatus,
    pub attempts: u32,
    pub customer_receipt: Option<String>,
    pub provider_receipt: Option<String>,
    pub last_attempt_at: DateTime<Utc>,
}

/// The document-store surface the workflow engine consumes.
///
/// The store is consistent per document but offers no transaction across a
/// job and its bids; callers tolerate the brief window where a job's status
/// has committed and its bid statuses have not. Implemented by
/// [`FirestoreStore`] for the real backend and [`MemoryStore`] for tests and
/// local development.
pub trait DocumentStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Set a job's status and stamp `updated_at`.
    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError>;

    async fn get_bid(&self, job_id: &str, bid_id: &str) -> Result<Option<Bid>, StoreError>;

    async fn list_bids(&self, job_id: &str) -> Result<Vec<Bid>, StoreError>;

    /// Batch-update bid statuses under one job in a single commit.
    async fn update_bid_statuses(
        &self,
        job_id: &str,
        updates: &[(String, BidStatus)],
    ) -> Result<(), StoreError>;

    /// Merge-upsert a chat thread; re-upserting the same deterministic id
    /// refreshes `last_activity` instead of duplicating the thread.
    async fn upsert_chat_thread(&self, thread: &ChatThread) -> Result<(), StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn put_user(&self, user: &UserProfile) -> Result<(), StoreError>;

    /// Persist the lazily provisioned gateway customer id onto a user.
    async fn set_billing_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), StoreError>;

    /// Create a fee record if none exists under its id. Returns `false` when
    /// the record was already there (duplicate completion delivery).
    async fn create_fee_record(&self, record: &FeeRecord) -> Result<bool, StoreError>;

    async fn get_fee_record(&self, record_id: &str) -> Result<Option<FeeRecord>, StoreError>;

    /// Compare-and-set update: applies `update` only while the record's
    /// current status is one of `expected`. Returns `false` when the guard
    /// fails (a concurrent settlement already concluded) or the record is
    /// gone.
    async fn update_fee_record_if(
        &self,
        record_id: &str,
        expected: &[FeeStatus],
        update: &FeeRecordUpdate,
    ) -> Result<bool, StoreError>;

    /// Fee records eligible for the retry sweep:
    /// `status == failed && attempts < max_attempts`.
    async fn list_retryable_fee_records(
        &self,
        max_attempts: u32,
    ) -> Result<Vec<FeeRecord>, StoreError>;
}
