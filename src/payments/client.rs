use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::error::PaymentError;
use super::types::{Charge, ChargeRequest, Customer, CustomerRequest};
use super::PaymentGateway;

const API_URL: &str = "https://api.stripe.com";

/// Thin client over the gateway's REST surface: customer provisioning and
/// off-session payment-intent capture. Requests are form-encoded; charge
/// requests carry an `Idempotency-Key` header so a retried attempt against a
/// side that already captured is a no-op on the gateway.
pub struct StripeClient {
    api_key: String,
    client: Client,
    base_url: String,
}

/// Error envelope the gateway returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

impl StripeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            client,
            base_url,
        }
    }

    fn check_configured(&self) -> Result<(), PaymentError> {
        if self.api_key.is_empty() {
            return Err(PaymentError::NotConfigured);
        }
        Ok(())
    }

    async fn read_error(response: reqwest::Response) -> PaymentError {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        if let Ok(body) = serde_json::from_str::<ApiErrorBody>(&text) {
            let message = body.error.message.unwrap_or_else(|| "unknown error".to_string());
            if body.error.kind.as_deref() == Some("card_error") {
                return PaymentError::Declined { message };
            }
            return PaymentError::ApiError { status, message };
        }
        PaymentError::ApiError {
            status,
            message: text,
        }
    }
}

impl PaymentGateway for StripeClient {
    async fn create_customer(&self, req: &CustomerRequest) -> Result<Customer, PaymentError> {
        self.check_configured()?;

        let mut form: Vec<(String, String)> = vec![
            ("email".into(), req.email.clone()),
            ("name".into(), req.name.clone()),
        ];
        for (key, value) in &req.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/customers", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        Ok(response.json::<Customer>().await?)
    }

    async fn charge(&self, req: &ChargeRequest) -> Result<Charge, PaymentError> {
        self.check_configured()?;

        let mut form: Vec<(String, String)> = vec![
            ("customer".into(), req.customer_id.clone()),
            ("amount".into(), req.amount.to_string()),
            ("currency".into(), req.currency.clone()),
            ("confirm".into(), "true".into()),
            ("off_session".into(), "true".into()),
        ];
        for (key, value) in &req.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let charge = response.json::<Charge>().await?;
        if charge.status != "succeeded" {
            return Err(PaymentError::Declined {
                message: format!("payment intent {} ended in status {}", charge.id, charge.status),
            });
        }
        Ok(charge)
    }
}
