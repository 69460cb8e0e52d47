//! Configuration for the transaction manager.

use std::time::Duration;

/// Configuration for a [`crate::TransactionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Chain every transaction is signed for.
    pub chain_id: u64,
    /// Gas limit used when a request does not set one.
    pub default_gas_limit: u64,
    /// Blocks since the last submission before a pending record is boosted.
    pub pending_blocks_before_boost: u64,
    /// Seconds since the last submission before a pending record is boosted.
    pub pending_seconds_before_boost: u64,
    /// Minimum fee increase of a boost, in percent of the current fee.
    pub min_fee_bump_percent: u32,
    /// Highest fee per gas the manager will ever offer.
    pub max_fee_per_gas_cap: Option<u128>,
    /// Attempts per nonce, the original included, before a record is stuck.
    /// Refused broadcasts of a never-accepted record count as attempts.
    pub max_attempts: u32,
    /// Blocks a mined record is kept before archival.
    pub retention_blocks: u64,
    /// Seconds a mined record is kept before archival.
    pub retention_seconds: u64,
    /// Period of the background sweeper.
    pub sweep_interval: Duration,
    /// How long a caller waits for the ledger to accept a broadcast.
    pub broadcast_timeout: Duration,
}

impl ManagerConfig {
    /// Creates a configuration for `chain_id` with default values.
    #[must_use]
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            default_gas_limit: 21_000,
            pending_blocks_before_boost: 5,
            pending_seconds_before_boost: 60,
            min_fee_bump_percent: 10,
            max_fee_per_gas_cap: None,
            max_attempts: 10,
            retention_blocks: 100,
            retention_seconds: 3600,
            sweep_interval: Duration::from_secs(15),
            broadcast_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the default gas limit.
    #[must_use]
    pub const fn with_default_gas_limit(mut self, gas_limit: u64) -> Self {
        self.default_gas_limit = gas_limit;
        self
    }

    /// Sets both stall thresholds.
    #[must_use]
    pub const fn with_boost_after(mut self, blocks: u64, seconds: u64) -> Self {
        self.pending_blocks_before_boost = blocks;
        self.pending_seconds_before_boost = seconds;
        self
    }

    /// Sets the minimum fee bump.
    #[must_use]
    pub const fn with_min_fee_bump_percent(mut self, percent: u32) -> Self {
        self.min_fee_bump_percent = percent;
        self
    }

    /// Caps the fee per gas.
    #[must_use]
    pub const fn with_max_fee_per_gas_cap(mut self, cap: u128) -> Self {
        self.max_fee_per_gas_cap = Some(cap);
        self
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the retention horizon for mined records.
    #[must_use]
    pub const fn with_retention(mut self, blocks: u64, seconds: u64) -> Self {
        self.retention_blocks = blocks;
        self.retention_seconds = seconds;
        self
    }

    /// Sets the sweeper period.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the broadcast timeout.
    #[must_use]
    pub const fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ManagerConfig::new(5);
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.pending_blocks_before_boost, 5);
        assert_eq!(config.min_fee_bump_percent, 10);
        assert_eq!(config.max_attempts, 10);
        assert!(config.max_fee_per_gas_cap.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
    }

    #[test]
    fn builder_pattern() {
        let config = ManagerConfig::new(1)
            .with_boost_after(2, 30)
            .with_max_attempts(3)
            .with_max_fee_per_gas_cap(500)
            .with_retention(10, 120)
            .with_broadcast_timeout(Duration::from_millis(50));

        assert_eq!(config.pending_blocks_before_boost, 2);
        assert_eq!(config.pending_seconds_before_boost, 30);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_fee_per_gas_cap, Some(500));
        assert_eq!(config.retention_blocks, 10);
        assert_eq!(config.retention_seconds, 120);
        assert_eq!(config.broadcast_timeout, Duration::from_millis(50));
    }
}
