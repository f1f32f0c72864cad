//! bidflow: the lifecycle workflow engine behind a two-sided service
//! marketplace. Customers post jobs, providers bid privately; an accepted bid
//! walks the job through a fixed lifecycle to completion, where the platform
//! captures a commission from both sides.
//!
//! The engine is a set of stateless event reactions over an injected
//! [`store::DocumentStore`] and [`payments::PaymentGateway`]; all durable
//! state lives in the store.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod model;
pub mod payments;
pub mod store;

pub use config::BidflowConfig;
pub use engine::WorkflowEngine;
pub use error::BidflowError;
pub use events::Event;
pub use fees::FeeSchedule;
