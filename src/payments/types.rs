//! Request and response types for the payment-gateway surface the engine
//! consumes: create a customer, capture a charge against one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request to provision a gateway customer for a marketplace user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub email: String,
    pub name: String,
    /// Free-form audit metadata (user id at minimum).
    pub metadata: BTreeMap<String, String>,
}

/// A provisioned gateway customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
}

/// Request to capture a single charge against a customer's payment method
/// on file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub customer_id: String,
    /// Amount in minor currency units (cents).
    pub amount: i64,
    /// ISO currency code, lowercase ("usd").
    pub currency: String,
    /// Audit metadata: role (customer/provider), job id, fee record id.
    pub metadata: BTreeMap<String, String>,
    /// Stable per-(record, side) key; retried attempts against a side that
    /// already captured are no-ops on the gateway.
    pub idempotency_key: String,
}

/// Result of a captured charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    /// Gateway charge identifier, stored on the fee record as the receipt.
    pub id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_request_roundtrip() {
        let req = ChargeRequest {
            customer_id: "cus_123".into(),
            amount: 733,
            currency: "usd".into(),
            metadata: BTreeMap::from([("role".to_string(), "customer".to_string())]),
            idempotency_key: "fee_j1:customer".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: ChargeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.customer_id, "cus_123");
        assert_eq!(parsed.amount, 733);
        assert_eq!(parsed.idempotency_key, "fee_j1:customer");
        assert_eq!(parsed.metadata["role"], "customer");
    }

    #[test]
    fn charge_deserializes_from_gateway_format() {
        let json = r#"{"id": "pi_abc", "status": "succeeded"}"#;
        let charge: Charge = serde_json::from_str(json).unwrap();
        assert_eq!(charge.id, "pi_abc");
        assert_eq!(charge.status, "succeeded");
    }
}
