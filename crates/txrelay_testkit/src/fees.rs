//! A fee source tests can steer.

use async_trait::async_trait;
use parking_lot::Mutex;
use txrelay_manager::{FeeError, FeeSource};
use txrelay_store::FeeFields;

/// Suggests whatever it was last told to.
#[derive(Debug)]
pub struct StaticFeeSource {
    fees: Mutex<Option<FeeFields>>,
}

impl StaticFeeSource {
    /// Suggests `fees` until told otherwise.
    #[must_use]
    pub fn new(fees: FeeFields) -> Self {
        Self {
            fees: Mutex::new(Some(fees)),
        }
    }

    /// Suggests a legacy gas price.
    #[must_use]
    pub fn legacy(gas_price: u128) -> Self {
        Self::new(FeeFields::Legacy { gas_price })
    }

    /// Changes the suggestion.
    pub fn set(&self, fees: FeeFields) {
        *self.fees.lock() = Some(fees);
    }

    /// Makes every suggestion fail until [`Self::set`] is called.
    pub fn set_unavailable(&self) {
        *self.fees.lock() = None;
    }
}

#[async_trait]
impl FeeSource for StaticFeeSource {
    async fn suggest_fees(&self) -> Result<FeeFields, FeeError> {
        (*self.fees.lock()).ok_or_else(|| FeeError::Unavailable("no suggestion configured".into()))
    }
}
