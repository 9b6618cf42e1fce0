//! rec-orchestrator: lifecycle orchestration for tokenized renewable energy certificates
//!
//! Accepts serialized action descriptors and drives them against a ledger:
//! - Smart meter readings for producing and consuming assets
//! - Certificate initialization, transfer and split
//! - Pricing in an ERC-20 settlement token and two-phase purchase
//!
//! Every action resolves to one signing identity, runs against freshly loaded
//! ledger state and ends in exactly one [`ActionReport`].

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod onboarding;
pub mod payment;
pub mod sync;

pub use action::{Action, ActionKind};
pub use config::{Config, ConfigStore, ContractConfig, FileConfigStore, MemoryConfigStore, SpenderPolicy};
pub use dispatcher::ActionDispatcher;
pub use error::{FailureKind, LedgerError, OrchestratorError, Result};
pub use identity::{ActionContext, Identity, IdentityContext, PrivateKey, SignerRole};
pub use ledger::{InMemoryLedger, LedgerClient};
pub use models::ActionReport;
pub use onboarding::{LogOnboarding, Onboarding, RecordingOnboarding};
