//! Fee suggestions and the replacement bump.

use crate::error::FeeError;
use async_trait::async_trait;
use txrelay_store::FeeFields;

/// Current network fee conditions.
#[async_trait]
pub trait FeeSource: Send + Sync {
    /// Suggested fees for a transaction sent now.
    async fn suggest_fees(&self) -> Result<FeeFields, FeeError>;
}

/// Outcome of computing replacement fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpOutcome {
    /// Fees for the replacement attempt.
    Bumped(FeeFields),
    /// The cap is below the smallest fee the ledger would accept as a
    /// replacement.
    Capped {
        /// Smallest acceptable fee per gas.
        required: u128,
        /// Configured cap.
        cap: u128,
    },
}

/// `price` raised by `percent`, rounded up.
#[must_use]
pub fn min_bump(price: u128, percent: u32) -> u128 {
    let percent = u128::from(percent);
    let rem = (price % 100) * percent;
    let increase = (price / 100)
        .saturating_mul(percent)
        .saturating_add(rem / 100 + u128::from(rem % 100 != 0));
    price.saturating_add(increase)
}

/// Clamps fresh fees to `cap`.
#[must_use]
pub fn cap_fees(fees: FeeFields, cap: Option<u128>) -> FeeFields {
    let Some(cap) = cap else {
        return fees;
    };
    match fees {
        FeeFields::Legacy { gas_price } => FeeFields::Legacy {
            gas_price: gas_price.min(cap),
        },
        FeeFields::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => FeeFields::Eip1559 {
            max_fee_per_gas: max_fee_per_gas.min(cap),
            max_priority_fee_per_gas: max_priority_fee_per_gas.min(cap),
        },
    }
}

/// Fees for replacing an attempt priced at `current`.
///
/// Every component is the larger of the suggestion and the current value
/// raised by `percent`. The pricing variant of `current` is kept: a legacy
/// suggestion for an EIP-1559 record becomes its fee cap, and vice versa the
/// fee cap of an EIP-1559 suggestion prices a legacy record.
#[must_use]
pub fn bump_fees(
    current: &FeeFields,
    suggested: &FeeFields,
    percent: u32,
    cap: Option<u128>,
) -> BumpOutcome {
    let bumped = match *current {
        FeeFields::Legacy { gas_price } => FeeFields::Legacy {
            gas_price: min_bump(gas_price, percent).max(suggested.max_price()),
        },
        FeeFields::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let suggested_priority = match *suggested {
                FeeFields::Legacy { .. } => 0,
                FeeFields::Eip1559 {
                    max_priority_fee_per_gas,
                    ..
                } => max_priority_fee_per_gas,
            };
            let priority = min_bump(max_priority_fee_per_gas, percent).max(suggested_priority);
            let max_fee = min_bump(max_fee_per_gas, percent)
                .max(suggested.max_price())
                .max(priority);
            FeeFields::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority,
            }
        }
    };

    let Some(cap) = cap else {
        return BumpOutcome::Bumped(bumped);
    };
    let required = min_bump(current.max_price(), percent);
    if required > cap {
        return BumpOutcome::Capped { required, cap };
    }
    BumpOutcome::Bumped(cap_fees(bumped, Some(cap)))
}
