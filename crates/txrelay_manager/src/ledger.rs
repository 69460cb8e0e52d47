//! The ledger the manager submits to, and how its rejections are read.

use crate::error::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use txrelay_store::{Address, BlockRef, TxHash};

/// Proof that a transaction was included in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Id of the mined transaction.
    pub tx_id: TxHash,
    /// Block that includes it.
    pub block: BlockRef,
}

/// Access to the shared ledger.
///
/// The ledger may drop, delay or reorder submissions; nothing it returns is
/// taken as authoritative for nonce allocation.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submits a signed raw transaction and returns its id.
    ///
    /// A refusal by the ledger is [`LedgerError::Rejected`] carrying the
    /// ledger's own message.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError>;

    /// Number of transactions from `address` included in blocks so far.
    async fn transaction_count(&self, address: &Address) -> Result<u64, LedgerError>;

    /// Receipt of `tx_id`, if it has been mined.
    async fn receipt(&self, tx_id: &TxHash) -> Result<Option<Receipt>, LedgerError>;

    /// Head of the chain.
    async fn current_block(&self) -> Result<BlockRef, LedgerError>;
}

/// Meaning of a broadcast rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionClass {
    /// The ledger already holds this exact transaction.
    AlreadyKnown,
    /// The nonce is already used.
    NonceTooLow,
    /// The fee is too low to enter the pool or to replace the pending attempt.
    Underpriced,
    /// The signer cannot pay for the transaction.
    InsufficientFunds,
    /// Anything else.
    Unknown,
}

impl RejectionClass {
    /// Whether the rejection means our transaction is already in flight.
    #[must_use]
    pub const fn counts_as_accepted(self) -> bool {
        matches!(self, Self::AlreadyKnown | Self::NonceTooLow)
    }

    /// Whether a later retry may succeed without operator action.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        !matches!(self, Self::InsufficientFunds)
    }
}

impl fmt::Display for RejectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlreadyKnown => "already_known",
            Self::NonceTooLow => "nonce_too_low",
            Self::Underpriced => "underpriced",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Maps a ledger's rejection message to a [`RejectionClass`].
///
/// Ledgers phrase the same condition differently, so the mapping is a
/// collaborator rather than a fixed table.
pub trait RejectionClassifier: Send + Sync {
    /// Classifies `message`.
    fn classify(&self, message: &str) -> RejectionClass;
}

/// Case-insensitive substring matching against per-class pattern lists.
///
/// Classes are tried in a fixed order: already known, nonce too low,
/// underpriced, insufficient funds.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Vec<(RejectionClass, Vec<String>)>,
}

impl PatternClassifier {
    /// A classifier with no patterns; everything is [`RejectionClass::Unknown`].
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: [
                RejectionClass::AlreadyKnown,
                RejectionClass::NonceTooLow,
                RejectionClass::Underpriced,
                RejectionClass::InsufficientFunds,
            ]
            .into_iter()
            .map(|class| (class, Vec::new()))
            .collect(),
        }
    }

    /// Adds a pattern for `class`.
    #[must_use]
    pub fn with_pattern(mut self, class: RejectionClass, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into().to_lowercase();
        match self.rules.iter_mut().find(|(c, _)| *c == class) {
            Some((_, patterns)) => patterns.push(pattern),
            None => self.rules.push((class, vec![pattern])),
        }
        self
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        use crate::ledger::RejectionClass::{AlreadyKnown, InsufficientFunds, NonceTooLow, Underpriced};

        [
            (AlreadyKnown, "already known"),
            (AlreadyKnown, "known transaction"),
            (AlreadyKnown, "already imported"),
            (AlreadyKnown, "transaction already exists"),
            (NonceTooLow, "nonce too low"),
            (NonceTooLow, "nonce is too low"),
            (NonceTooLow, "nonce has already been used"),
            (Underpriced, "underpriced"),
            (Underpriced, "fee too low"),
            (Underpriced, "less than block base fee"),
            (InsufficientFunds, "insufficient funds"),
            (InsufficientFunds, "insufficient balance"),
        ]
        .into_iter()
        .fold(Self::empty(), |classifier, (class, pattern)| {
            classifier.with_pattern(class, pattern)
        })
    }
}

impl RejectionClassifier for PatternClassifier {
    fn classify(&self, message: &str) -> RejectionClass {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| message.contains(p.as_str())))
            .map_or(RejectionClass::Unknown, |(class, _)| *class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns() {
        let classifier = PatternClassifier::default();
        assert_eq!(
            classifier.classify("ALREADY KNOWN"),
            RejectionClass::AlreadyKnown
        );
        assert_eq!(
            classifier.classify("nonce too low: next nonce 7, tx nonce 5"),
            RejectionClass::NonceTooLow
        );
        assert_eq!(
            classifier.classify("replacement transaction underpriced"),
            RejectionClass::Underpriced
        );
        assert_eq!(
            classifier.classify("insufficient funds for gas * price + value"),
            RejectionClass::InsufficientFunds
        );
        assert_eq!(classifier.classify("execution reverted"), RejectionClass::Unknown);
    }

    #[test]
    fn custom_patterns() {
        let classifier =
            PatternClassifier::empty().with_pattern(RejectionClass::NonceTooLow, "OldNonce");
        assert_eq!(classifier.classify("error: oldnonce"), RejectionClass::NonceTooLow);
        assert_eq!(classifier.classify("nonce too low"), RejectionClass::Unknown);
    }

    #[test]
    fn class_semantics() {
        assert!(RejectionClass::AlreadyKnown.counts_as_accepted());
        assert!(RejectionClass::NonceTooLow.counts_as_accepted());
        assert!(!RejectionClass::Underpriced.counts_as_accepted());
        assert!(RejectionClass::Underpriced.is_transient());
        assert!(!RejectionClass::InsufficientFunds.is_transient());
    }
}
