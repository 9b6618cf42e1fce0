//! Dispatcher - action routing and reporting
//!
//! Turns one serialized descriptor into exactly one [`ActionReport`]. Parsing,
//! identity resolution and the lifecycle operation all run inside the action's
//! scope; any error they raise becomes a failed report instead of escaping,
//! so one bad action never stops the ones after it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::action::{Action, InitializePayload, MeterReadPayload};
use crate::config::{ConfigStore, PaymentConfig};
use crate::error::{LedgerResultExt, Result};
use crate::identity::{ActionContext, Identity, IdentityContext, PrivateKey};
use crate::ledger::LedgerClient;
use crate::lifecycle::{CertificateLifecycle, TokenSource};
use crate::models::*;
use crate::onboarding::Onboarding;
use crate::payment::PaymentBridge;
use crate::sync::EntitySync;

/// Successful action summary
struct ActionOutcome {
    message: String,
    details: serde_json::Value,
}

impl ActionOutcome {
    fn new(message: impl Into<String>, details: impl serde::Serialize) -> Result<Self> {
        Ok(Self {
            message: message.into(),
            details: serde_json::to_value(details)?,
        })
    }
}

/// Parsed action with its resolved context
struct Prepared {
    action: Action,
    context: ActionContext,
    admin: Identity,
}

pub struct ActionDispatcher {
    ledger: Arc<dyn LedgerClient>,
    config_store: Arc<dyn ConfigStore>,
    onboarding: Arc<dyn Onboarding>,
    payment: PaymentConfig,
}

impl ActionDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        config_store: Arc<dyn ConfigStore>,
        onboarding: Arc<dyn Onboarding>,
    ) -> Self {
        Self {
            ledger,
            config_store,
            onboarding,
            payment: PaymentConfig::default(),
        }
    }

    pub fn with_payment(mut self, payment: PaymentConfig) -> Self {
        self.payment = payment;
        self
    }

    /// Run one action to completion and report its outcome
    pub async fn dispatch(&self, raw: &str, admin_key: &str) -> ActionReport {
        let start = Instant::now();

        let (context, result) = match self.prepare(raw, admin_key).await {
            Ok(prepared) => {
                let span = info_span!(
                    "action",
                    action_id = %prepared.context.action_id(),
                    kind = %prepared.context.kind(),
                    signer = %prepared.context.signer(),
                );
                let result = async {
                    info!(role = ?prepared.context.role(), "Action begin");
                    let result = self.execute(&prepared).await;
                    info!("Action end");
                    result
                }
                .instrument(span)
                .await;
                (Some(prepared.context), result)
            }
            Err(e) => (None, Err(e)),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let action_id = context
            .as_ref()
            .map(|c| c.action_id().to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let kind = context
            .as_ref()
            .map(|c| c.kind().to_string())
            .unwrap_or_else(|| type_tag_of(raw));
        let signer = context.as_ref().map(|c| c.signer().clone());

        match result {
            Ok(outcome) => {
                info!(action_id = %action_id, kind = %kind, duration_ms, "Action completed successfully");
                ActionReport {
                    action_id,
                    kind,
                    signer,
                    success: true,
                    message: outcome.message,
                    duration_ms,
                    failure: None,
                    details: Some(outcome.details),
                }
            }
            Err(e) => {
                error!(
                    action_id = %action_id,
                    kind = %kind,
                    duration_ms,
                    failure = ?e.kind(),
                    error = %e,
                    "Action failed"
                );
                ActionReport {
                    action_id,
                    kind,
                    signer,
                    success: false,
                    message: e.to_string(),
                    duration_ms,
                    failure: Some(e.kind()),
                    details: None,
                }
            }
        }
    }

    /// Run actions strictly one after another
    pub async fn dispatch_all<S: AsRef<str>>(&self, raws: &[S], admin_key: &str) -> Vec<ActionReport> {
        let mut reports = Vec::with_capacity(raws.len());
        for raw in raws {
            reports.push(self.dispatch(raw.as_ref(), admin_key).await);
        }
        reports
    }

    async fn prepare(&self, raw: &str, admin_key: &str) -> Result<Prepared> {
        let action = Action::parse(raw)?;
        let admin_key = PrivateKey::parse(admin_key)?;
        let admin_address = self
            .ledger
            .account_address(&admin_key)
            .await
            .during("derive admin account")?;
        let admin = Identity::new(admin_address, admin_key);

        let (role, identity) = IdentityContext::resolve(&action, &admin);
        let context = ActionContext::new(action.type_tag(), role, identity);
        Ok(Prepared {
            action,
            context,
            admin,
        })
    }

    async fn execute(&self, prepared: &Prepared) -> Result<ActionOutcome> {
        let sync = EntitySync::new(self.ledger.as_ref(), &prepared.context);
        let lifecycle = CertificateLifecycle::new(&sync);

        match &prepared.action {
            Action::SaveSmartMeterReadProducing(read) => {
                self.save_meter_read(&lifecycle, AssetKind::Producing, read).await
            }
            Action::SaveSmartMeterReadConsuming(read) => {
                self.save_meter_read(&lifecycle, AssetKind::Consuming, read).await
            }
            Action::InitializeCertificates(payload) => self.initialize(&lifecycle, payload).await,
            Action::TransferCertificate(payload) => {
                let outcome = lifecycle.transfer(payload.cert_id, &payload.to).await?;
                ActionOutcome::new(
                    format!("Certificate #{} transferred to {}", payload.cert_id, payload.to),
                    outcome,
                )
            }
            Action::SplitCertificate(payload) => {
                let outcome = lifecycle.split(payload.cert_id, payload.split_value).await?;
                let children: Vec<String> = outcome
                    .children
                    .iter()
                    .map(|c| format!("#{} ({} W)", c.id, c.power_in_w))
                    .collect();
                ActionOutcome::new(
                    format!(
                        "Certificate #{} split into {}",
                        payload.cert_id,
                        children.join(", ")
                    ),
                    outcome,
                )
            }
            Action::SetErc20Certificate(payload) => {
                let source = match &payload.token {
                    Some(token) => TokenSource::Existing(token.clone()),
                    None => TokenSource::Deploy {
                        holder: payload.test_account.clone(),
                    },
                };
                let outcome = lifecycle.set_price(payload.cert_id, source, payload.price).await?;
                self.config_store
                    .persist_settlement_token(&outcome.token)
                    .await?;
                ActionOutcome::new(
                    format!(
                        "Certificate #{} priced at {} in token {}",
                        payload.cert_id, payload.price, outcome.token
                    ),
                    outcome,
                )
            }
            Action::BuyCertificate(payload) => {
                let contracts = self.config_store.contracts().await?;
                let certificate_contract = self
                    .ledger
                    .certificate_contract()
                    .await
                    .during("read certificate contract")?;
                let bridge = PaymentBridge::new(&sync, self.payment.spender, certificate_contract);
                let receipt = lifecycle
                    .buy(
                        payload.cert_id,
                        payload.price,
                        contracts.erc20_address.as_ref(),
                        &bridge,
                    )
                    .await?;
                ActionOutcome::new(
                    format!("Certificate #{} bought by {}", payload.cert_id, payload.buyer),
                    receipt,
                )
            }
            Action::Unrecognized(descriptor) => {
                self.onboarding
                    .onboard(&descriptor.to_string(), &prepared.admin.private_key)
                    .await?;
                ActionOutcome::new("Forwarded to onboarding", descriptor)
            }
        }
    }

    async fn save_meter_read(
        &self,
        lifecycle: &CertificateLifecycle<'_, '_>,
        kind: AssetKind,
        read: &MeterReadPayload,
    ) -> Result<ActionOutcome> {
        let reference = AssetRef { kind, id: read.asset_id };
        let asset = lifecycle
            .save_meter_read(reference, read.meter_reading, &read.file_hash)
            .await?;
        ActionOutcome::new(
            format!("Smart meter reading saved for {}", reference),
            asset,
        )
    }

    async fn initialize(
        &self,
        lifecycle: &CertificateLifecycle<'_, '_>,
        payload: &InitializePayload,
    ) -> Result<ActionOutcome> {
        let owner_address = match &payload.owner_address {
            Some(address) => address.clone(),
            None => self
                .ledger
                .account_address(&payload.owner_pk)
                .await
                .during("derive asset owner account")?,
        };
        let asset_owner = Identity::new(owner_address, payload.owner_pk.clone());

        let registry = match &payload.registry {
            Some(registry) => registry.clone(),
            None => self.config_store.contracts().await?.origin_contract_lookup,
        };

        let asset = lifecycle
            .initialize(payload.asset_id, &asset_owner, &registry)
            .await?;
        ActionOutcome::new(
            format!("Certificates for asset #{} initialized", payload.asset_id),
            asset,
        )
    }
}

/// Best-effort type tag for descriptors that failed to parse
fn type_tag_of(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_else(|| "UNPARSED".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_of() {
        assert_eq!(type_tag_of(r#"{"type": "BUY_CERTIFICATE"}"#), "BUY_CERTIFICATE");
        assert_eq!(type_tag_of("not json"), "UNPARSED");
        assert_eq!(type_tag_of(r#"{"data": {}}"#), "UNPARSED");
    }
}
