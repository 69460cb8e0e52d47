//! Primitive ledger types shared by the store and the manager.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            #[must_use]
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Copies from a slice of exactly `LEN` bytes.
            #[must_use]
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(digits).map_err(|e| e.to_string())?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    format!("expected {} bytes, got {}", $len, bytes.len())
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// A 20-byte account address (worker key, destination).
    Address,
    20
);

fixed_bytes!(
    /// A 32-byte hash.
    H256,
    32
);

/// Content hash of a signed raw transaction.
pub type TxHash = H256;

/// Hash of a ledger block.
pub type BlockHash = H256;

/// A block as observed on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Block timestamp in seconds since the Unix epoch.
    pub timestamp: u64,
}

impl BlockRef {
    /// Creates a block reference.
    #[must_use]
    pub const fn new(number: u64, hash: BlockHash, timestamp: u64) -> Self {
        Self {
            number,
            hash,
            timestamp,
        }
    }
}

/// Fee fields of one attempt. Legacy and EIP-1559 pricing never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeFields {
    /// Single gas price.
    Legacy {
        /// Price per unit of gas.
        gas_price: u128,
    },
    /// Fee cap plus tip.
    Eip1559 {
        /// Maximum total fee per unit of gas.
        max_fee_per_gas: u128,
        /// Maximum tip per unit of gas.
        max_priority_fee_per_gas: u128,
    },
}

impl FeeFields {
    /// Returns true for single-price fees.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }

    /// The most the sender pays per unit of gas.
    #[must_use]
    pub const fn max_price(&self) -> u128 {
        match *self {
            Self::Legacy { gas_price } => gas_price,
            Self::Eip1559 {
                max_fee_per_gas, ..
            } => max_fee_per_gas,
        }
    }
}

impl fmt::Display for FeeFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy { gas_price } => write!(f, "gas_price={gas_price}"),
            Self::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => write!(
                f,
                "max_fee={max_fee_per_gas} priority_fee={max_priority_fee_per_gas}"
            ),
        }
    }
}

/// Why a transaction was sent. Opaque to the manager, kept for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxAction {
    /// Executes a signed relay request.
    RelayCall,
    /// Plain value transfer between accounts.
    ValueTransfer,
    /// Registers the relay server on-chain.
    RegisterServer,
    /// Adds worker keys to the relay manager.
    AddWorkers,
    /// Sets the owner of the relay manager.
    SetOwner,
    /// Authorizes a relay hub.
    AuthorizeHub,
    /// Moves deposited balance out.
    DepositWithdrawal,
    /// Submits a penalization.
    Penalization,
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelayCall => "relay_call",
            Self::ValueTransfer => "value_transfer",
            Self::RegisterServer => "register_server",
            Self::AddWorkers => "add_workers",
            Self::SetOwner => "set_owner",
            Self::AuthorizeHub => "authorize_hub",
            Self::DepositWithdrawal => "deposit_withdrawal",
            Self::Penalization => "penalization",
        };
        f.write_str(name)
    }
}

/// Lifecycle position of a stored attempt.
///
/// Boosted attempts are `Broadcast` with `attempts > 1`; archived records are
/// gone from the store. Ordered along the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Persisted, not yet accepted by the ledger.
    Created,
    /// Accepted by the ledger, waiting to be mined.
    Broadcast,
    /// A receipt was observed.
    Mined,
}

/// Serde adapter writing byte vectors as `0x`-prefixed hex.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
