pub mod client;
pub mod error;
pub mod types;

pub use client::StripeClient;
pub use error::PaymentError;
pub use types::{Charge, ChargeRequest, Customer, CustomerRequest};

/// The opaque payment capability the workflow engine consumes: provision a
/// customer, capture a charge. Implemented by [`StripeClient`] for the real
/// gateway and by in-memory mocks in tests.
pub trait PaymentGateway {
    async fn create_customer(&self, req: &CustomerRequest) -> Result<Customer, PaymentError>;
    async fn charge(&self, req: &ChargeRequest) -> Result<Charge, PaymentError>;
}
