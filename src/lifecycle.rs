//! Certificate lifecycle
//!
//! ```text
//!   Active ──transfer──▶ Active
//!   Active ──price─────▶ Active (priced) ──buy──▶ Sold
//!   Active ──split─────▶ Split   (children Active)
//! ```
//!
//! Every operation loads a fresh snapshot, checks it is still `Active`, submits
//! its transaction(s) through [`EntitySync`] and returns reloaded snapshots.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{LedgerResultExt, OrchestratorError, Result};
use crate::identity::Identity;
use crate::models::*;
use crate::payment::{PaymentBridge, PurchaseReceipt};
use crate::sync::EntitySync;

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub certificate: Certificate,
    pub previous_owner: Address,
    pub owner_balance_before: u64,
    pub owner_balance_after: u64,
    pub recipient_balance_before: u64,
    pub recipient_balance_after: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitOutcome {
    pub parent: Certificate,
    pub parent_power_before: u64,
    pub children: Vec<Certificate>,
}

/// Where the settlement token for pricing comes from
#[derive(Debug, Clone)]
pub enum TokenSource {
    Existing(Address),
    /// Deploy a test token whose supply goes to `holder`
    Deploy { holder: Address },
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingOutcome {
    pub certificate: Certificate,
    pub token: Address,
    pub deployed: bool,
}

pub struct CertificateLifecycle<'s, 'a> {
    sync: &'s EntitySync<'a>,
}

impl<'s, 'a> CertificateLifecycle<'s, 'a> {
    pub fn new(sync: &'s EntitySync<'a>) -> Self {
        Self { sync }
    }

    fn signer(&self) -> &'a Identity {
        self.sync.context().identity()
    }

    /// Record a smart meter reading; signed by the meter identity.
    pub async fn save_meter_read(
        &self,
        reference: AssetRef,
        reading: u64,
        file_hash: &str,
    ) -> Result<Asset> {
        let asset: Asset = self.sync.load(reference).await?;
        let ledger = self.sync.ledger();

        let asset = self
            .sync
            .commit(
                asset,
                "save smart meter read",
                ledger.save_smart_meter_read(reference, reading, file_hash, self.signer()),
            )
            .await?;

        info!(asset = %reference, reading = asset.latest_meter_reading, "Smart meter reading saved");
        Ok(asset)
    }

    /// Enable certificate issuance for a producing asset in `registry`.
    ///
    /// The registry call is signed by the asset owner, not the action identity.
    pub async fn initialize(
        &self,
        asset_id: AssetId,
        asset_owner: &Identity,
        registry: &Address,
    ) -> Result<Asset> {
        let reference = AssetRef { kind: AssetKind::Producing, id: asset_id };
        let asset: Asset = self.sync.load(reference).await?;
        let ledger = self.sync.ledger();

        let asset = self
            .sync
            .commit(
                asset,
                "set market lookup contract",
                ledger.set_market_lookup_contract(asset_id, registry, asset_owner),
            )
            .await?;

        info!(asset = %reference, registry = %registry, "Certificates initialized");
        Ok(asset)
    }

    pub async fn transfer(&self, id: CertificateId, to: &Address) -> Result<TransferOutcome> {
        let ledger = self.sync.ledger();
        let certificate: Certificate = self.sync.load(id).await?;
        certificate.ensure_active("transfer")?;
        let previous_owner = certificate.owner.clone();

        let owner_balance_before = ledger
            .certificate_balance(&previous_owner)
            .await
            .during("read owner balance")?;
        let recipient_balance_before = ledger
            .certificate_balance(to)
            .await
            .during("read recipient balance")?;

        let certificate = self
            .sync
            .commit(
                certificate,
                "transfer certificate",
                ledger.transfer_certificate(id, to, self.signer()),
            )
            .await?;

        let owner_balance_after = ledger
            .certificate_balance(&previous_owner)
            .await
            .during("read owner balance")?;
        let recipient_balance_after = ledger
            .certificate_balance(to)
            .await
            .during("read recipient balance")?;

        info!(certificate = %id, from = %previous_owner, to = %to, "Certificate transferred");
        Ok(TransferOutcome {
            certificate,
            previous_owner,
            owner_balance_before,
            owner_balance_after,
            recipient_balance_before,
            recipient_balance_after,
        })
    }

    pub async fn split(&self, id: CertificateId, split_value: u64) -> Result<SplitOutcome> {
        let ledger = self.sync.ledger();
        let certificate: Certificate = self.sync.load(id).await?;
        certificate.ensure_active("split")?;
        let parent_power_before = certificate.power_in_w;

        let parent = self
            .sync
            .commit(
                certificate,
                "split certificate",
                ledger.split_certificate(id, split_value, self.signer()),
            )
            .await?;

        let mut children = Vec::with_capacity(parent.children.len());
        for child in &parent.children {
            children.push(self.sync.load::<Certificate>(*child).await?);
        }

        let children_power: u64 = children.iter().map(|c| c.power_in_w).sum();
        if children_power > parent_power_before {
            return Err(OrchestratorError::ConservationViolated {
                certificate: id,
                parent_power: parent_power_before,
                children_power,
            });
        }

        info!(
            certificate = %id,
            children = ?parent.children,
            split_value,
            "Certificate split"
        );
        Ok(SplitOutcome {
            parent,
            parent_power_before,
            children,
        })
    }

    /// Set the settlement token, then the price.
    ///
    /// A failed price update after the token landed is reported as
    /// [`OrchestratorError::PartialPricing`]; the token is not unset.
    pub async fn set_price(
        &self,
        id: CertificateId,
        source: TokenSource,
        price: u64,
    ) -> Result<PricingOutcome> {
        let ledger = self.sync.ledger();
        let certificate: Certificate = self.sync.load(id).await?;
        certificate.ensure_active("price")?;

        let (token, deployed) = match source {
            TokenSource::Existing(token) => (token, false),
            TokenSource::Deploy { holder } => {
                let token = ledger
                    .deploy_settlement_token(&holder, self.signer())
                    .await
                    .during("deploy settlement token")?;
                info!(token = %token, holder = %holder, "Settlement token deployed");
                (token, true)
            }
        };

        let certificate = self
            .sync
            .commit(
                certificate,
                "set tradable token",
                ledger.set_tradable_token(id, &token, self.signer()),
            )
            .await?;

        if let Err(source) = ledger.set_purchase_price(id, price, self.signer()).await {
            warn!(
                certificate = %id,
                token = %token,
                error = %source,
                "Price update failed after token was set"
            );
            return Err(OrchestratorError::PartialPricing {
                certificate: id,
                token,
                source,
            });
        }
        let certificate = self.sync.reload(certificate).await?;

        info!(certificate = %id, token = %token, price, "Certificate priced");
        Ok(PricingOutcome {
            certificate,
            token,
            deployed,
        })
    }

    /// Buy through the payment bridge.
    ///
    /// Uses the certificate's tradable token, else `fallback_token`.
    pub async fn buy(
        &self,
        id: CertificateId,
        price: u64,
        fallback_token: Option<&Address>,
        bridge: &PaymentBridge<'_, '_>,
    ) -> Result<PurchaseReceipt> {
        let certificate: Certificate = self.sync.load(id).await?;
        certificate.ensure_active("buy")?;
        if certificate.price_in_token.is_none() {
            return Err(OrchestratorError::InvalidTransition {
                certificate: id,
                status: certificate.status,
                operation: "buy unpriced",
            });
        }

        let token = certificate
            .tradable_token
            .clone()
            .or_else(|| fallback_token.cloned())
            .ok_or_else(|| {
                OrchestratorError::Config(format!("no settlement token for certificate #{}", id))
            })?;

        let receipt = bridge.authorize_and_buy(certificate, &token, price).await?;
        info!(
            certificate = %id,
            buyer = %receipt.certificate.owner,
            price,
            "Certificate bought"
        );
        Ok(receipt)
    }
}
