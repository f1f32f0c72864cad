//! The closed set of events the workflow engine reacts to.
//!
//! The host runtime (document-change triggers plus a fixed-interval
//! scheduler) is modeled as an explicit event stream rather than implicit
//! exported-function binding, so dispatch is testable and delivery is assumed
//! at-least-once everywhere.

use crate::model::Job;

#[derive(Debug, Clone)]
pub enum Event {
    /// A new account was created; the engine scaffolds a default profile.
    UserCreated {
        user_id: String,
        email: String,
        display_name: String,
    },
    /// A job document changed. The engine inspects which fields moved to
    /// decide between the bid-acceptance and completion reactions.
    JobUpdated { before: Job, after: Job },
    /// Fixed-interval scheduler fired; runs the settlement retry sweep.
    ScheduleTick,
}
