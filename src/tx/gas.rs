//! Fee arithmetic for replacement transactions

use crate::error::{SchedulerError, SchedulerResult};

use ethers::types::U256;
use tracing::debug;

const BASIS_POINTS: u64 = 10_000;

/// EIP-1559 fee pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip1559Fees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Computes escalating fees for stuck-nonce replacements
#[derive(Debug, Clone, Copy)]
pub struct FeeBumper {
    /// Multiplier per attempt in basis points (e.g., 20000 = 2x)
    multiplier_bps: u64,
}

impl FeeBumper {
    /// Create a bumper from a multiplier such as `2.0`. The multiplier is
    /// kept in basis points and must stay above 1x after rounding.
    pub fn new(multiplier: f64) -> SchedulerResult<Self> {
        let multiplier_bps = if multiplier.is_finite() && multiplier > 1.0 {
            (multiplier * BASIS_POINTS as f64).round() as u64
        } else {
            0
        };

        if multiplier_bps <= BASIS_POINTS {
            return Err(SchedulerError::Config(format!(
                "bump_multiplier must be at least 1.0001, got {}",
                multiplier
            )));
        }

        Ok(Self { multiplier_bps })
    }

    pub fn multiplier_bps(&self) -> u64 {
        self.multiplier_bps
    }

    /// `fee * multiplier`, always at least one wei higher than `fee`
    pub fn speed_up(&self, fee: U256) -> U256 {
        let bumped = fee.saturating_mul(U256::from(self.multiplier_bps)) / BASIS_POINTS;
        bumped.max(fee.saturating_add(U256::one()))
    }

    /// Fees of replacement attempt `attempt` (1-based): `base * multiplier^attempt`.
    /// Everything above the base fee goes to the block producer as tip.
    pub fn replacement_fees(&self, base_fee: U256, attempt: u32) -> Eip1559Fees {
        let mut max_fee_per_gas = base_fee;
        for _ in 0..attempt.max(1) {
            max_fee_per_gas = self.speed_up(max_fee_per_gas);
        }

        let fees = Eip1559Fees {
            max_fee_per_gas,
            max_priority_fee_per_gas: max_fee_per_gas - base_fee,
        };

        debug!(
            attempt,
            base_fee = %base_fee,
            max_fee_per_gas = %fees.max_fee_per_gas,
            "Computed replacement fees"
        );
        fees
    }
}
