//! Firestore REST backend for the document store.
//!
//! Collections mirror the original platform: `job_posts` with a `bids`
//! sub-collection, `users`, `chats`, and `fees`. Conditional writes use
//! Firestore's `currentDocument` preconditions: `exists=false` for
//! create-if-absent, `updateTime` for the fee-record compare-and-set.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{DocumentStore, FeeRecordUpdate, StoreError};
use crate::model::{Bid, BidStatus, ChatThread, FeeRecord, FeeStatus, Job, JobStatus, UserProfile};

const API_URL: &str = "https://firestore.googleapis.com/v1";

pub struct FirestoreStore {
    client: Client,
    token: String,
    base_url: String,
    /// `projects/{project}/databases/(default)/documents`
    root: String,
}

/// A document as the REST API returns it.
#[derive(Debug, Deserialize)]
struct FsDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(rename = "updateTime")]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<FsDocument>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    document: Option<FsDocument>,
}

/// Write precondition for a patch.
enum Precondition {
    None,
    NotExists,
    UpdateTime(String),
}

impl FirestoreStore {
    pub fn new(project: String, token: String) -> Self {
        Self::with_base_url(project, token, API_URL.to_string())
    }

    /// Create a store pointing at a custom base URL (useful for testing).
    pub fn with_base_url(project: String, token: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            token,
            base_url,
            root: format!("projects/{project}/databases/(default)/documents"),
        }
    }

    fn doc_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.root, path)
    }

    async fn api_error(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        StoreError::ApiError { status, message }
    }

    async fn get_doc(&self, path: &str) -> Result<Option<FsDocument>, StoreError> {
        let response = self
            .client
            .get(self.doc_url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(Some(response.json::<FsDocument>().await?))
    }

    /// Patch a document, writing only the masked fields. Returns `false`
    /// when the precondition failed (409), `true` on success.
    async fn patch_doc(
        &self,
        path: &str,
        fields: Map<String, Value>,
        mask: &[&str],
        precondition: Precondition,
    ) -> Result<bool, StoreError> {
        let mut query: Vec<(String, String)> = mask
            .iter()
            .map(|field| ("updateMask.fieldPaths".to_string(), (*field).to_string()))
            .collect();
        match precondition {
            Precondition::None => {}
            Precondition::NotExists => {
                query.push(("currentDocument.exists".into(), "false".into()));
            }
            Precondition::UpdateTime(time) => {
                query.push(("currentDocument.updateTime".into(), time));
            }
        }

        let response = self
            .client
            .patch(self.doc_url(path))
            .bearer_auth(&self.token)
            .query(&query)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(true)
    }

    async fn commit(&self, writes: Vec<Value>) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/{}:commit", self.base_url, self.root))
            .bearer_auth(&self.token)
            .json(&json!({ "writes": writes }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    async fn run_query(&self, query: Value) -> Result<Vec<FsDocument>, StoreError> {
        let response = self
            .client
            .post(format!("{}/{}:runQuery", self.base_url, self.root))
            .bearer_auth(&self.token)
            .json(&json!({ "structuredQuery": query }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let results = response.json::<Vec<QueryResult>>().await?;
        Ok(results.into_iter().filter_map(|r| r.document).collect())
    }
}

// ---- value encoding ----

fn sv(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn iv(i: i64) -> Value {
    // Firestore carries integers as decimal strings.
    json!({ "integerValue": i.to_string() })
}

fn bv(b: bool) -> Value {
    json!({ "booleanValue": b })
}

fn tv(t: DateTime<Utc>) -> Value {
    json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

fn av(items: &[String]) -> Value {
    let values: Vec<Value> = items.iter().map(|s| sv(s)).collect();
    json!({ "arrayValue": { "values": values } })
}

// ---- value decoding ----

fn decode_err(doc: &FsDocument, reason: impl Into<String>) -> StoreError {
    StoreError::Decode {
        path: doc.name.clone(),
        reason: reason.into(),
    }
}

fn doc_id(doc: &FsDocument) -> String {
    doc.name.rsplit('/').next().unwrap_or(&doc.name).to_string()
}

fn str_field(doc: &FsDocument, key: &str) -> Result<String, StoreError> {
    opt_str_field(doc, key)?.ok_or_else(|| decode_err(doc, format!("missing field {key}")))
}

fn opt_str_field(doc: &FsDocument, key: &str) -> Result<Option<String>, StoreError> {
    match doc.fields.get(key) {
        None => Ok(None),
        Some(value) => value
            .get("stringValue")
            .and_then(Value::as_str)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| decode_err(doc, format!("field {key} is not a string"))),
    }
}

fn i64_field(doc: &FsDocument, key: &str) -> Result<i64, StoreError> {
    doc.fields
        .get(key)
        .and_then(|v| v.get("integerValue"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| decode_err(doc, format!("field {key} is not an integer")))
}

fn bool_field(doc: &FsDocument, key: &str) -> Result<bool, StoreError> {
    match doc.fields.get(key) {
        None => Ok(false),
        Some(value) => value
            .get("booleanValue")
            .and_then(Value::as_bool)
            .ok_or_else(|| decode_err(doc, format!("field {key} is not a boolean"))),
    }
}

fn ts_field(doc: &FsDocument, key: &str) -> Result<DateTime<Utc>, StoreError> {
    opt_ts_field(doc, key)?.ok_or_else(|| decode_err(doc, format!("missing field {key}")))
}

fn opt_ts_field(doc: &FsDocument, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    match doc.fields.get(key) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .get("timestampValue")
                .and_then(Value::as_str)
                .ok_or_else(|| decode_err(doc, format!("field {key} is not a timestamp")))?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| decode_err(doc, format!("field {key}: {e}")))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
    }
}

fn enum_field<T: serde::de::DeserializeOwned>(doc: &FsDocument, key: &str) -> Result<T, StoreError> {
    let raw = str_field(doc, key)?;
    serde_json::from_value(Value::String(raw.clone()))
        .map_err(|_| decode_err(doc, format!("field {key} has unknown value {raw}")))
}

fn decode_job(doc: &FsDocument) -> Result<Job, StoreError> {
    Ok(Job {
        id: doc_id(doc),
        poster_id: str_field(doc, "poster_id")?,
        category: str_field(doc, "category")?,
        status: enum_field(doc, "status")?,
        accepted_bid: opt_str_field(doc, "accepted_bid")?,
        created_at: ts_field(doc, "created_at")?,
        updated_at: ts_field(doc, "updated_at")?,
    })
}

fn decode_bid(job_id: &str, doc: &FsDocument) -> Result<Bid, StoreError> {
    Ok(Bid {
        id: doc_id(doc),
        job_id: job_id.to_string(),
        provider_id: str_field(doc, "provider_id")?,
        amount: i64_field(doc, "amount")?,
        status: enum_field(doc, "status")?,
        created_at: ts_field(doc, "created_at")?,
    })
}

fn decode_user(doc: &FsDocument) -> Result<UserProfile, StoreError> {
    Ok(UserProfile {
        id: doc_id(doc),
        email: str_field(doc, "email")?,
        display_name: str_field(doc, "display_name")?,
        billing_customer_id: opt_str_field(doc, "billing_customer_id")?,
        has_payment_method: bool_field(doc, "has_payment_method")?,
        created_at: ts_field(doc, "created_at")?,
    })
}

fn decode_fee_record(doc: &FsDocument) -> Result<FeeRecord, StoreError> {
    Ok(FeeRecord {
        id: doc_id(doc),
        job_id: str_field(doc, "job_id")?,
        customer_id: str_field(doc, "customer_id")?,
        provider_id: str_field(doc, "provider_id")?,
        percent: i64_field(doc, "percent")? as u32,
        customer_amount: i64_field(doc, "customer_amount")?,
        provider_amount: i64_field(doc, "provider_amount")?,
        status: enum_field(doc, "status")?,
        attempts: i64_field(doc, "attempts")? as u32,
        customer_receipt: opt_str_field(doc, "customer_receipt")?,
        provider_receipt: opt_str_field(doc, "provider_receipt")?,
        last_attempt_at: opt_ts_field(doc, "last_attempt_at")?,
        created_at: ts_field(doc, "created_at")?,
    })
}

fn encode_fee_record(record: &FeeRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("job_id".into(), sv(&record.job_id));
    fields.insert("customer_id".into(), sv(&record.customer_id));
    fields.insert("provider_id".into(), sv(&record.provider_id));
    fields.insert("percent".into(), iv(i64::from(record.percent)));
    fields.insert("customer_amount".into(), iv(record.customer_amount));
    fields.insert("provider_amount".into(), iv(record.provider_amount));
    fields.insert("status".into(), sv(&record.status.to_string()));
    fields.insert("attempts".into(), iv(i64::from(record.attempts)));
    if let Some(receipt) = &record.customer_receipt {
        fields.insert("customer_receipt".into(), sv(receipt));
    }
    if let Some(receipt) = &record.provider_receipt {
        fields.insert("provider_receipt".into(), sv(receipt));
    }
    if let Some(at) = record.last_attempt_at {
        fields.insert("last_attempt_at".into(), tv(at));
    }
    fields.insert("created_at".into(), tv(record.created_at));
    fields
}

fn encode_user(user: &UserProfile) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("email".into(), sv(&user.email));
    fields.insert("display_name".into(), sv(&user.display_name));
    if let Some(id) = &user.billing_customer_id {
        fields.insert("billing_customer_id".into(), sv(id));
    }
    fields.insert("has_payment_method".into(), bv(user.has_payment_method));
    fields.insert("created_at".into(), tv(user.created_at));
    fields
}

impl DocumentStore for FirestoreStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        match self.get_doc(&format!("job_posts/{job_id}")).await? {
            Some(doc) => Ok(Some(decode_job(&doc)?)),
            None => Ok(None),
        }
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("status".into(), sv(&status.to_string()));
        fields.insert("updated_at".into(), tv(Utc::now()));
        self.patch_doc(
            &format!("job_posts/{job_id}"),
            fields,
            &["status", "updated_at"],
            Precondition::None,
        )
        .await?;
        Ok(())
    }

    async fn get_bid(&self, job_id: &str, bid_id: &str) -> Result<Option<Bid>, StoreError> {
        match self
            .get_doc(&format!("job_posts/{job_id}/bids/{bid_id}"))
            .await?
        {
            Some(doc) => Ok(Some(decode_bid(job_id, &doc)?)),
            None => Ok(None),
        }
    }

    async fn list_bids(&self, job_id: &str) -> Result<Vec<Bid>, StoreError> {
        let response = self
            .client
            .get(self.doc_url(&format!("job_posts/{job_id}/bids")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let list = response.json::<ListResponse>().await?;
        list.documents
            .iter()
            .map(|doc| decode_bid(job_id, doc))
            .collect()
    }

    async fn update_bid_statuses(
        &self,
        job_id: &str,
        updates: &[(String, BidStatus)],
    ) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let writes: Vec<Value> = updates
            .iter()
            .map(|(bid_id, status)| {
                json!({
                    "update": {
                        "name": format!("{}/job_posts/{job_id}/bids/{bid_id}", self.root),
                        "fields": { "status": sv(&status.to_string()) }
                    },
                    "updateMask": { "fieldPaths": ["status"] }
                })
            })
            .collect();
        self.commit(writes).await
    }

    async fn upsert_chat_thread(&self, thread: &ChatThread) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("job_id".into(), sv(&thread.job_id));
        fields.insert("participants".into(), av(&thread.participants));
        fields.insert("last_activity".into(), tv(thread.last_activity));
        self.patch_doc(
            &format!("chats/{}", thread.id),
            fields,
            &["job_id", "participants", "last_activity"],
            Precondition::None,
        )
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        match self.get_doc(&format!("users/{user_id}")).await? {
            Some(doc) => Ok(Some(decode_user(&doc)?)),
            None => Ok(None),
        }
    }

    async fn put_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let fields = encode_user(user);
        let mask: Vec<&str> = fields.keys().map(String::as_str).collect();
        self.patch_doc(&format!("users/{}", user.id), fields.clone(), &mask, Precondition::None)
            .await?;
        Ok(())
    }

    async fn set_billing_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("billing_customer_id".into(), sv(customer_id));
        self.patch_doc(
            &format!("users/{user_id}"),
            fields,
            &["billing_customer_id"],
            Precondition::None,
        )
        .await?;
        Ok(())
    }

    async fn create_fee_record(&self, record: &FeeRecord) -> Result<bool, StoreError> {
        let fields = encode_fee_record(record);
        let mask: Vec<&str> = fields.keys().map(String::as_str).collect();
        self.patch_doc(
            &format!("fees/{}", record.id),
            fields.clone(),
            &mask,
            Precondition::NotExists,
        )
        .await
    }

    async fn get_fee_record(&self, record_id: &str) -> Result<Option<FeeRecord>, StoreError> {
        match self.get_doc(&format!("fees/{record_id}")).await? {
            Some(doc) => Ok(Some(decode_fee_record(&doc)?)),
            None => Ok(None),
        }
    }

    async fn update_fee_record_if(
        &self,
        record_id: &str,
        expected: &[FeeStatus],
        update: &FeeRecordUpdate,
    ) -> Result<bool, StoreError> {
        // Optimistic lock: re-read for the current update time, then patch
        // with an updateTime precondition. A concurrent writer between the
        // read and the patch turns up as a 409 and the CAS reports false.
        let Some(doc) = self.get_doc(&format!("fees/{record_id}")).await? else {
            return Ok(false);
        };
        let current: FeeStatus = enum_field(&doc, "status")?;
        if !expected.contains(&current) {
            return Ok(false);
        }
        let Some(update_time) = doc.update_time.clone() else {
            return Err(decode_err(&doc, "document has no updateTime"));
        };

        let mut fields = Map::new();
        let mut mask: Vec<&str> = vec!["status", "attempts", "last_attempt_at"];
        fields.insert("status".into(), sv(&update.status.to_string()));
        fields.insert("attempts".into(), iv(i64::from(update.attempts)));
        fields.insert("last_attempt_at".into(), tv(update.last_attempt_at));
        if let Some(receipt) = &update.customer_receipt {
            fields.insert("customer_receipt".into(), sv(receipt));
            mask.push("customer_receipt");
        }
        if let Some(receipt) = &update.provider_receipt {
            fields.insert("provider_receipt".into(), sv(receipt));
            mask.push("provider_receipt");
        }

        self.patch_doc(
            &format!("fees/{record_id}"),
            fields,
            &mask,
            Precondition::UpdateTime(update_time),
        )
        .await
    }

    async fn list_retryable_fee_records(
        &self,
        max_attempts: u32,
    ) -> Result<Vec<FeeRecord>, StoreError> {
        let query = json!({
            "from": [{ "collectionId": "fees" }],
            "where": {
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        {
                            "fieldFilter": {
                                "field": { "fieldPath": "status" },
                                "op": "EQUAL",
                                "value": { "stringValue": FeeStatus::Failed.to_string() }
                            }
                        },
                        {
                            "fieldFilter": {
                                "field": { "fieldPath": "attempts" },
                                "op": "LESS_THAN",
                                "value": { "integerValue": max_attempts.to_string() }
                            }
                        }
                    ]
                }
            }
        });
        let docs = self.run_query(query).await?;
        docs.iter().map(decode_fee_record).collect()
    }
}
