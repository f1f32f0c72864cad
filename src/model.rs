use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a posted job.
///
/// A job starts `Open`, moves to `PendingConfirmation` when the poster accepts
/// a bid, and ends in `Completed` (or `Disputed`). The serialized form matches
/// the document store's wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Open,
    PendingConfirmation,
    InProgress,
    Working,
    Completed,
    Disputed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Open => "open",
            JobStatus::PendingConfirmation => "pending-confirmation",
            JobStatus::InProgress => "in-progress",
            JobStatus::Working => "working",
            JobStatus::Completed => "completed",
            JobStatus::Disputed => "disputed",
        };
        write!(f, "{s}")
    }
}

/// A posted unit of work.
///
/// Invariant: `accepted_bid` is `Some` exactly when `status != Open`. The
/// workflow engine only ever mutates `status` and `accepted_bid` after
/// creation; everything else is written by the posting flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub poster_id: String,
    pub category: String,
    pub status: JobStatus,
    #[serde(default)]
    pub accepted_bid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(poster_id: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            poster_id: poster_id.into(),
            category: category.into(),
            status: JobStatus::Open,
            accepted_bid: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a provider's bid against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// A provider's priced, private offer against a job.
///
/// `amount` is in minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub job_id: String,
    pub provider_id: String,
    pub amount: i64,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(job_id: impl Into<String>, provider_id: impl Into<String>, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            provider_id: provider_id.into(),
            amount,
            status: BidStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A chat thread between a job poster and an accepted provider.
///
/// The identifier is a pure function of the job and the sorted participant
/// pair, so re-running the acceptance reaction upserts the same document
/// instead of creating a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: String,
    pub job_id: String,
    pub participants: [String; 2],
    pub last_activity: DateTime<Utc>,
}

impl ChatThread {
    /// Derive the deterministic thread identifier for a job and two participants.
    pub fn thread_id(job_id: &str, a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{job_id}_{lo}_{hi}")
    }

    /// Build the thread for a job between its poster and a provider, with a
    /// fresh last-activity stamp.
    pub fn between(job_id: &str, poster_id: &str, provider_id: &str) -> Self {
        let (lo, hi) = if poster_id <= provider_id {
            (poster_id, provider_id)
        } else {
            (provider_id, poster_id)
        };
        Self {
            id: Self::thread_id(job_id, poster_id, provider_id),
            job_id: job_id.to_string(),
            participants: [lo.to_string(), hi.to_string()],
            last_activity: Utc::now(),
        }
    }
}

/// Settlement status of a fee record.
///
/// Transitions are monotonic towards `Charged`: `Pending → Charged`,
/// `Pending → Failed`, `Failed → Charged`. A record never leaves `Charged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Charged,
    Failed,
}

impl std::fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeeStatus::Pending => "pending",
            FeeStatus::Charged => "charged",
            FeeStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The platform's ledger entry for the per-side commission on a completed job.
///
/// Both sides owe the same percentage of the accepted bid amount, each rounded
/// independently. Receipts are recorded per side as soon as that side's charge
/// captures, even when the record as a whole ends an attempt `Failed`; a
/// retry never re-charges a side that already holds a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub id: String,
    pub job_id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub percent: u32,
    pub customer_amount: i64,
    pub provider_amount: i64,
    pub status: FeeStatus,
    pub attempts: u32,
    #[serde(default)]
    pub customer_receipt: Option<String>,
    #[serde(default)]
    pub provider_receipt: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FeeRecord {
    /// Deterministic record identifier for a job. Completing the same job
    /// twice (duplicate trigger delivery) resolves to the same ledger entry.
    pub fn record_id(job_id: &str) -> String {
        format!("fee_{job_id}")
    }

    pub fn new(
        job_id: &str,
        customer_id: &str,
        provider_id: &str,
        percent: u32,
        per_side_amount: i64,
    ) -> Self {
        Self {
            id: Self::record_id(job_id),
            job_id: job_id.to_string(),
            customer_id: customer_id.to_string(),
            provider_id: provider_id.to_string(),
            percent,
            customer_amount: per_side_amount,
            provider_amount: per_side_amount,
            status: FeeStatus::Pending,
            attempts: 0,
            customer_receipt: None,
            provider_receipt: None,
            last_attempt_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A marketplace user as the workflow engine sees one.
///
/// `billing_customer_id` is the lazily created payment-gateway customer,
/// persisted back here on first settlement so later charges reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub billing_customer_id: Option<String>,
    #[serde(default)]
    pub has_payment_method: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Default profile scaffolded by the on-user-created hook.
    pub fn scaffold(id: &str, email: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            billing_customer_id: None,
            has_payment_method: false,
            created_at: Utc::now(),
        }
    }
}
