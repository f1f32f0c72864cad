//! Commission math for completed jobs.
//!
//! The platform charges both sides of a job the same percentage of the
//! accepted bid. Amounts are minor currency units (cents) end to end, rounded
//! half-up at each multiplication, independently per side — never by splitting
//! a combined rounded total.

use serde::{Deserialize, Serialize};

/// The percentage each side of a completed job owes the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub percent: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { percent: 10 }
    }
}

impl FeeSchedule {
    pub fn new(percent: u32) -> Self {
        Self { percent }
    }

    /// Fee owed by one side for a bid of `amount` minor units, rounded
    /// half-up to the nearest minor unit.
    pub fn per_side(&self, amount: i64) -> i64 {
        round_half_up_percent(amount, self.percent)
    }

    /// Combined platform take for a job (both sides, each rounded on its own).
    pub fn total(&self, amount: i64) -> i64 {
        self.per_side(amount) + self.per_side(amount)
    }
}

/// `amount * percent / 100`, rounded half-up. `amount` must be non-negative;
/// bids carry positive amounts by construction.
fn round_half_up_percent(amount: i64, percent: u32) -> i64 {
    (amount * i64::from(percent) + 50) / 100
}
