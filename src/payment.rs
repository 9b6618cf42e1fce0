//! Two-phase certificate payment
//!
//! Approve and buy are separate, independently committed transactions. When
//! the approval lands and the purchase does not, the allowance stays granted;
//! no revocation is attempted and the failure is reported as
//! [`OrchestratorError::PartialPayment`] for the operator to resolve.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SpenderPolicy;
use crate::error::{LedgerResultExt, OrchestratorError, Result};
use crate::models::{Address, Certificate};
use crate::sync::EntitySync;

/// Result of a completed purchase
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    /// Snapshot reloaded after the purchase confirmed
    pub certificate: Certificate,
    pub token: Address,
    pub spender: Address,
    pub allowance_observed: u64,
    pub buyer_balance_before: u64,
    pub buyer_balance_after: u64,
}

/// Sequences approve and buy for the action's buyer identity
pub struct PaymentBridge<'s, 'a> {
    sync: &'s EntitySync<'a>,
    policy: SpenderPolicy,
    certificate_contract: Address,
}

impl<'s, 'a> PaymentBridge<'s, 'a> {
    pub fn new(sync: &'s EntitySync<'a>, policy: SpenderPolicy, certificate_contract: Address) -> Self {
        Self {
            sync,
            policy,
            certificate_contract,
        }
    }

    fn spender_for(&self, certificate: &Certificate) -> Address {
        match self.policy {
            SpenderPolicy::Seller => certificate.owner.clone(),
            SpenderPolicy::CertificateContract => self.certificate_contract.clone(),
        }
    }

    /// Grant `price` to the spender, verify the allowance, then buy
    pub async fn authorize_and_buy(
        &self,
        certificate: Certificate,
        token: &Address,
        price: u64,
    ) -> Result<PurchaseReceipt> {
        let ledger = self.sync.ledger();
        let buyer = self.sync.context().identity();
        let spender = self.spender_for(&certificate);
        let id = certificate.id;

        ledger
            .approve(token, &spender, price, buyer)
            .await
            .during("approve")?;
        info!(certificate = %id, spender = %spender, amount = price, "Allowance granted");

        let observed = ledger
            .allowance(token, &buyer.address, &spender)
            .await
            .during("read allowance")?;
        let required = certificate.price_in_token.unwrap_or(price).max(price);
        if observed < required {
            warn!(
                certificate = %id,
                observed,
                required,
                "Allowance below price, purchase not attempted"
            );
            return Err(OrchestratorError::InsufficientAllowance {
                owner: buyer.address.clone(),
                spender,
                observed,
                required,
            });
        }

        let buyer_balance_before = ledger
            .certificate_balance(&buyer.address)
            .await
            .during("read buyer balance")?;

        if let Err(source) = ledger.buy_certificate(id, buyer).await {
            warn!(
                certificate = %id,
                spender = %spender,
                amount = price,
                error = %source,
                "Purchase failed after approval; allowance left in place"
            );
            return Err(OrchestratorError::PartialPayment {
                certificate: id,
                spender,
                amount: price,
                source,
            });
        }

        let committed = move |operation: &'static str| {
            move |e: OrchestratorError| match e {
                OrchestratorError::Ledger { source, .. } => OrchestratorError::PurchaseCommitted {
                    certificate: id,
                    operation,
                    source,
                },
                other => other,
            }
        };
        let certificate = self
            .sync
            .reload(certificate)
            .await
            .map_err(committed("reload certificate"))?;
        let buyer_balance_after = ledger
            .certificate_balance(&buyer.address)
            .await
            .during("read buyer balance")
            .map_err(committed("read buyer balance"))?;

        Ok(PurchaseReceipt {
            certificate,
            token: token.clone(),
            spender,
            allowance_observed: observed,
            buyer_balance_before,
            buyer_balance_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::identity::{ActionContext, Identity, PrivateKey, SignerRole};
    use crate::ledger::memory::derive_address;
    use crate::ledger::{InMemoryLedger, LedgerClient};
    use crate::models::{AssetKind, CertificateId, CertificateStatus};

    fn identity(seed: u8) -> Identity {
        let key = PrivateKey::parse(&format!("{:02x}", seed).repeat(32)).unwrap();
        Identity::new(derive_address(&key), key)
    }

    /// Priced certificate owned by seed 1; buyer (seed 5) holds the token supply
    async fn priced_certificate(ledger: &InMemoryLedger, price: u64) -> (CertificateId, Address) {
        let owner = identity(1);
        let buyer = identity(5);
        let asset = ledger
            .register_asset(AssetKind::Producing, &owner.address, &identity(2).address)
            .await;
        ledger
            .set_market_lookup_contract(asset.id, &Address::new("0x10"), &owner)
            .await
            .unwrap();
        let id = ledger.issue_certificate(asset.id, 1000).await.unwrap();
        let token = ledger.deploy_settlement_token(&buyer.address, &owner).await.unwrap();
        ledger.set_tradable_token(id, &token, &owner).await.unwrap();
        ledger.set_purchase_price(id, price, &owner).await.unwrap();
        (id, token)
    }

    #[tokio::test]
    async fn test_authorize_and_buy() {
        let ledger = InMemoryLedger::new();
        let (id, token) = priced_certificate(&ledger, 50).await;
        let context = ActionContext::new("BUY_CERTIFICATE", SignerRole::Buyer, identity(5));
        let sync = EntitySync::new(&ledger, &context);
        let bridge = PaymentBridge::new(&sync, SpenderPolicy::Seller, Address::new("0xc0"));

        let certificate = sync.load::<Certificate>(id).await.unwrap();
        let receipt = bridge.authorize_and_buy(certificate, &token, 50).await.unwrap();

        assert_eq!(receipt.certificate.status, CertificateStatus::Sold);
        assert_eq!(receipt.certificate.owner, identity(5).address);
        assert_eq!(receipt.allowance_observed, 50);
        assert_eq!(receipt.buyer_balance_after, receipt.buyer_balance_before + 1);
        assert_eq!(
            ledger.token_balance(&token, &identity(1).address).await.unwrap(),
            50
        );
    }

    #[tokio::test]
    async fn test_low_allowance_fails_before_buy() {
        let ledger = InMemoryLedger::new();
        let (id, token) = priced_certificate(&ledger, 80).await;
        let context = ActionContext::new("BUY_CERTIFICATE", SignerRole::Buyer, identity(5));
        let sync = EntitySync::new(&ledger, &context);
        let bridge = PaymentBridge::new(&sync, SpenderPolicy::Seller, Address::new("0xc0"));

        let certificate = sync.load::<Certificate>(id).await.unwrap();
        let err = bridge.authorize_and_buy(certificate, &token, 30).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::LedgerRejection);
        assert!(matches!(
            err,
            OrchestratorError::InsufficientAllowance { observed: 30, required: 80, .. }
        ));
        let methods: Vec<String> = ledger.transactions().await.into_iter().map(|t| t.method).collect();
        assert_eq!(methods.last().map(String::as_str), Some("approve"));
        assert!(!methods.iter().any(|m| m == "buy_certificate"));
    }

    #[tokio::test]
    async fn test_read_failure_after_buy_reports_committed_sale() {
        let ledger = InMemoryLedger::new();
        let (id, token) = priced_certificate(&ledger, 50).await;
        let context = ActionContext::new("BUY_CERTIFICATE", SignerRole::Buyer, identity(5));
        let sync = EntitySync::new(&ledger, &context);
        let bridge = PaymentBridge::new(&sync, SpenderPolicy::Seller, Address::new("0xc0"));

        let certificate = sync.load::<Certificate>(id).await.unwrap();
        ledger.reject_next("certificate", "timeout").await;
        let err = bridge.authorize_and_buy(certificate, &token, 50).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::PurchaseCommitted { operation: "reload certificate", .. }
        ));
        assert!(err.to_string().contains("committed"));
        let certificate = ledger.certificate(id).await.unwrap();
        assert_eq!(certificate.status, CertificateStatus::Sold);
        assert_eq!(certificate.owner, identity(5).address);
    }

    #[tokio::test]
    async fn test_failed_buy_leaves_allowance_outstanding() {
        let ledger = InMemoryLedger::new();
        let (id, token) = priced_certificate(&ledger, 50).await;
        let context = ActionContext::new("BUY_CERTIFICATE", SignerRole::Buyer, identity(5));
        let sync = EntitySync::new(&ledger, &context);
        let bridge = PaymentBridge::new(&sync, SpenderPolicy::Seller, Address::new("0xc0"));
        ledger.reject_next("buy_certificate", "price changed").await;

        let certificate = sync.load::<Certificate>(id).await.unwrap();
        let err = bridge.authorize_and_buy(certificate, &token, 50).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::PartialPaymentState);
        let outstanding = ledger
            .allowance(&token, &identity(5).address, &identity(1).address)
            .await
            .unwrap();
        assert_eq!(outstanding, 50);
        assert_eq!(
            ledger.certificate(id).await.unwrap().status,
            CertificateStatus::Active
        );
    }
}
