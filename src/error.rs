//! Error types for certificate orchestration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Address, CertificateId, CertificateStatus};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Failure reported by a ledger client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger refused the transaction (invalid state, insufficient funds)
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The signing credential is not allowed to perform the call
    #[error("signer {signer} not authorized: {reason}")]
    Unauthorized { signer: Address, reason: String },

    /// The entity does not exist on the ledger
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure between client and ledger
    #[error("network error: {0}")]
    Network(String),
}

/// Error category surfaced in action reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LedgerRejection,
    Configuration,
    PartialPaymentState,
    PartialPricingState,
}

/// Orchestration error
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A ledger read or transaction failed
    #[error("{operation} failed: {source}")]
    Ledger {
        operation: &'static str,
        #[source]
        source: LedgerError,
    },

    /// Missing or malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Action descriptor could not be parsed
    #[error("Invalid action payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Lifecycle operation not defined for the certificate's status
    #[error("cannot {operation} certificate #{certificate} in status {status:?}")]
    InvalidTransition {
        certificate: CertificateId,
        status: CertificateStatus,
        operation: &'static str,
    },

    /// Allowance observed after approval is below the purchase price
    #[error("allowance {observed} from {owner} to {spender} is below price {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        observed: u64,
        required: u64,
    },

    /// Child certificates carry more power than the parent had before the split
    #[error("split of certificate #{certificate} produced {children_power} W from {parent_power} W")]
    ConservationViolated {
        certificate: CertificateId,
        parent_power: u64,
        children_power: u64,
    },

    /// Approval committed, purchase failed; the allowance stays granted
    #[error(
        "allowance of {amount} to {spender} granted but purchase of certificate #{certificate} failed: {source}"
    )]
    PartialPayment {
        certificate: CertificateId,
        spender: Address,
        amount: u64,
        #[source]
        source: LedgerError,
    },

    /// Purchase committed; a read afterwards failed
    #[error("purchase of certificate #{certificate} committed but {operation} failed: {source}")]
    PurchaseCommitted {
        certificate: CertificateId,
        operation: &'static str,
        #[source]
        source: LedgerError,
    },

    /// Settlement token set, price update failed
    #[error("settlement token {token} set on certificate #{certificate} but price was not: {source}")]
    PartialPricing {
        certificate: CertificateId,
        token: Address,
        #[source]
        source: LedgerError,
    },

    /// Forwarding to the onboarding collaborator failed
    #[error("Onboarding error: {0}")]
    Onboarding(String),
}

impl OrchestratorError {
    pub fn ledger(operation: &'static str, source: LedgerError) -> Self {
        OrchestratorError::Ledger { operation, source }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestratorError::Ledger { .. }
            | OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::InsufficientAllowance { .. }
            | OrchestratorError::ConservationViolated { .. }
            | OrchestratorError::PurchaseCommitted { .. } => FailureKind::LedgerRejection,
            OrchestratorError::Config(_)
            | OrchestratorError::Payload(_)
            | OrchestratorError::Onboarding(_) => FailureKind::Configuration,
            OrchestratorError::PartialPayment { .. } => FailureKind::PartialPaymentState,
            OrchestratorError::PartialPricing { .. } => FailureKind::PartialPricingState,
        }
    }
}

/// Attaches the failing operation name to ledger results
pub trait LedgerResultExt<T> {
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> LedgerResultExt<T> for std::result::Result<T, LedgerError> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| OrchestratorError::ledger(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let rejected = OrchestratorError::ledger("buy", LedgerError::Rejected("sold".into()));
        assert_eq!(rejected.kind(), FailureKind::LedgerRejection);

        let partial = OrchestratorError::PartialPayment {
            certificate: CertificateId(3),
            spender: Address::new("0xabc"),
            amount: 10,
            source: LedgerError::Network("timeout".into()),
        };
        assert_eq!(partial.kind(), FailureKind::PartialPaymentState);
        assert!(partial.to_string().contains("certificate #3"));

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(OrchestratorError::from(parse).kind(), FailureKind::Configuration);
    }

    #[test]
    fn test_during_wraps_operation() {
        let result: std::result::Result<(), LedgerError> =
            Err(LedgerError::NotFound("certificate #9".into()));
        let err = result.during("load certificate").unwrap_err();
        assert_eq!(err.to_string(), "load certificate failed: not found: certificate #9");
    }
}
