//! Ledger client abstraction
//!
//! The orchestrator never talks to a chain directly. Every read and every
//! signed transaction goes through a [`LedgerClient`], which resolves only
//! once the ledger has confirmed (or rejected) the call.
//!
//! - [`memory::InMemoryLedger`]: self-contained reference ledger used by the
//!   binary's state-file mode and by tests

pub mod memory;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::identity::{Identity, PrivateKey};
use crate::models::{Address, Asset, AssetId, AssetRef, Certificate, CertificateId};

pub use memory::InMemoryLedger;

/// Confirmed-result access to the certificate, asset and token contracts.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Account controlled by a private key.
    async fn account_address(&self, key: &PrivateKey) -> Result<Address, LedgerError>;

    // --- asset registries ---

    async fn asset(&self, asset: AssetRef) -> Result<Asset, LedgerError>;

    async fn save_smart_meter_read(
        &self,
        asset: AssetRef,
        reading: u64,
        file_hash: &str,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    /// Enables certificate issuance for a producing asset.
    async fn set_market_lookup_contract(
        &self,
        asset: AssetId,
        lookup: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    // --- certificates ---

    async fn certificate(&self, id: CertificateId) -> Result<Certificate, LedgerError>;

    /// Number of certificates held by `owner`.
    async fn certificate_balance(&self, owner: &Address) -> Result<u64, LedgerError>;

    async fn transfer_certificate(
        &self,
        id: CertificateId,
        to: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    async fn split_certificate(
        &self,
        id: CertificateId,
        power_in_w: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    async fn set_tradable_token(
        &self,
        id: CertificateId,
        token: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    async fn set_purchase_price(
        &self,
        id: CertificateId,
        price: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    /// Consumes the buyer's allowance and moves ownership to the signer.
    async fn buy_certificate(&self, id: CertificateId, signer: &Identity) -> Result<(), LedgerError>;

    /// Contract that executes purchases; accepted as allowance spender.
    async fn certificate_contract(&self) -> Result<Address, LedgerError>;

    // --- settlement token ---

    /// Deploys a test settlement token whose supply goes to `holder`.
    async fn deploy_settlement_token(
        &self,
        holder: &Address,
        signer: &Identity,
    ) -> Result<Address, LedgerError>;

    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError>;

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<u64, LedgerError>;

    async fn token_balance(&self, token: &Address, holder: &Address) -> Result<u64, LedgerError>;
}
