//! Action descriptors
//!
//! Wire shape: `{ "type": "<ACTION_KIND>", "data": { ... } }`. Known kinds
//! parse into typed payloads; anything else is kept verbatim for onboarding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OrchestratorError, Result};
use crate::identity::{Identity, PrivateKey};
use crate::models::{deserialize_numeric, Address, AssetId, CertificateId};

/// Action kinds handled by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    SaveSmartmeterReadProducing,
    SaveSmartmeterReadConsuming,
    InitializeCertificates,
    TransferCertificate,
    SplitCertificate,
    #[serde(rename = "SET_ERC20_CERTIFICATE")]
    SetErc20Certificate,
    BuyCertificate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::SaveSmartmeterReadProducing,
        ActionKind::SaveSmartmeterReadConsuming,
        ActionKind::InitializeCertificates,
        ActionKind::TransferCertificate,
        ActionKind::SplitCertificate,
        ActionKind::SetErc20Certificate,
        ActionKind::BuyCertificate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SaveSmartmeterReadProducing => "SAVE_SMARTMETER_READ_PRODUCING",
            ActionKind::SaveSmartmeterReadConsuming => "SAVE_SMARTMETER_READ_CONSUMING",
            ActionKind::InitializeCertificates => "INITIALIZE_CERTIFICATES",
            ActionKind::TransferCertificate => "TRANSFER_CERTIFICATE",
            ActionKind::SplitCertificate => "SPLIT_CERTIFICATE",
            ActionKind::SetErc20Certificate => "SET_ERC20_CERTIFICATE",
            ActionKind::BuyCertificate => "BUY_CERTIFICATE",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

//=============================================================================
// PAYLOADS
//=============================================================================

/// Asset owner's address and key as sent in payloads
#[derive(Debug, Clone, Deserialize)]
pub struct OwnerCredential {
    #[serde(rename = "assetOwner")]
    pub address: Address,
    #[serde(rename = "assetOwnerPK")]
    pub private_key: PrivateKey,
}

impl OwnerCredential {
    pub fn identity(&self) -> Identity {
        Identity::new(self.address.clone(), self.private_key.clone())
    }
}

/// SAVE_SMARTMETER_READ_PRODUCING / SAVE_SMARTMETER_READ_CONSUMING
#[derive(Debug, Clone, Deserialize)]
pub struct MeterReadPayload {
    #[serde(rename = "assetId")]
    pub asset_id: AssetId,
    #[serde(
        rename = "meterreading",
        alias = "meterReading",
        deserialize_with = "deserialize_numeric"
    )]
    pub meter_reading: u64,
    #[serde(rename = "filehash", alias = "fileHash")]
    pub file_hash: String,
    #[serde(rename = "smartMeter")]
    pub smart_meter: Address,
    #[serde(rename = "smartMeterPK")]
    pub smart_meter_pk: PrivateKey,
}

/// INITIALIZE_CERTIFICATES
#[derive(Debug, Clone, Deserialize)]
pub struct InitializePayload {
    #[serde(rename = "assetId")]
    pub asset_id: AssetId,
    /// Derived from the key when absent
    #[serde(rename = "assetOwner", default)]
    pub owner_address: Option<Address>,
    #[serde(rename = "assetOwnerPK")]
    pub owner_pk: PrivateKey,
    /// Falls back to the configured origin lookup contract
    #[serde(default, alias = "marketLookup")]
    pub registry: Option<Address>,
}

/// TRANSFER_CERTIFICATE
#[derive(Debug, Clone, Deserialize)]
pub struct TransferPayload {
    #[serde(rename = "certId")]
    pub cert_id: CertificateId,
    #[serde(rename = "addressTo")]
    pub to: Address,
    #[serde(flatten)]
    pub owner: OwnerCredential,
}

/// SPLIT_CERTIFICATE
#[derive(Debug, Clone, Deserialize)]
pub struct SplitPayload {
    #[serde(rename = "certId")]
    pub cert_id: CertificateId,
    #[serde(rename = "splitValue", deserialize_with = "deserialize_numeric")]
    pub split_value: u64,
    #[serde(flatten)]
    pub owner: OwnerCredential,
}

/// SET_ERC20_CERTIFICATE
#[derive(Debug, Clone, Deserialize)]
pub struct PricingPayload {
    #[serde(rename = "certId")]
    pub cert_id: CertificateId,
    #[serde(deserialize_with = "deserialize_numeric")]
    pub price: u64,
    /// Receives the initial supply of a freshly deployed settlement token
    #[serde(rename = "testAccount")]
    pub test_account: Address,
    /// Existing settlement token; skips deployment
    #[serde(default)]
    pub token: Option<Address>,
    #[serde(flatten)]
    pub owner: OwnerCredential,
}

/// BUY_CERTIFICATE
#[derive(Debug, Clone, Deserialize)]
pub struct BuyPayload {
    #[serde(rename = "certId")]
    pub cert_id: CertificateId,
    #[serde(deserialize_with = "deserialize_numeric")]
    pub price: u64,
    pub buyer: Address,
    #[serde(rename = "buyerPK")]
    pub buyer_pk: PrivateKey,
}

//=============================================================================
// ACTION
//=============================================================================

/// A parsed action descriptor
#[derive(Debug, Clone)]
pub enum Action {
    SaveSmartMeterReadProducing(MeterReadPayload),
    SaveSmartMeterReadConsuming(MeterReadPayload),
    InitializeCertificates(InitializePayload),
    TransferCertificate(TransferPayload),
    SplitCertificate(SplitPayload),
    SetErc20Certificate(PricingPayload),
    BuyCertificate(BuyPayload),
    /// Forwarded unchanged to onboarding
    Unrecognized(serde_json::Value),
}

impl Action {
    /// Parse a serialized descriptor
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let kind = match value
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse::<ActionKind>().ok())
        {
            Some(kind) => kind,
            None => return Ok(Action::Unrecognized(value)),
        };

        let data = value.get("data").cloned().ok_or_else(|| {
            OrchestratorError::Config(format!("{} descriptor has no data", kind))
        })?;

        let action = match kind {
            ActionKind::SaveSmartmeterReadProducing => {
                Action::SaveSmartMeterReadProducing(serde_json::from_value(data)?)
            }
            ActionKind::SaveSmartmeterReadConsuming => {
                Action::SaveSmartMeterReadConsuming(serde_json::from_value(data)?)
            }
            ActionKind::InitializeCertificates => {
                Action::InitializeCertificates(serde_json::from_value(data)?)
            }
            ActionKind::TransferCertificate => {
                Action::TransferCertificate(serde_json::from_value(data)?)
            }
            ActionKind::SplitCertificate => Action::SplitCertificate(serde_json::from_value(data)?),
            ActionKind::SetErc20Certificate => {
                Action::SetErc20Certificate(serde_json::from_value(data)?)
            }
            ActionKind::BuyCertificate => Action::BuyCertificate(serde_json::from_value(data)?),
        };

        Ok(action)
    }

    /// `None` for unrecognized descriptors
    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            Action::SaveSmartMeterReadProducing(_) => Some(ActionKind::SaveSmartmeterReadProducing),
            Action::SaveSmartMeterReadConsuming(_) => Some(ActionKind::SaveSmartmeterReadConsuming),
            Action::InitializeCertificates(_) => Some(ActionKind::InitializeCertificates),
            Action::TransferCertificate(_) => Some(ActionKind::TransferCertificate),
            Action::SplitCertificate(_) => Some(ActionKind::SplitCertificate),
            Action::SetErc20Certificate(_) => Some(ActionKind::SetErc20Certificate),
            Action::BuyCertificate(_) => Some(ActionKind::BuyCertificate),
            Action::Unrecognized(_) => None,
        }
    }

    /// Type tag as it appeared on the wire
    pub fn type_tag(&self) -> String {
        match self {
            Action::Unrecognized(value) => value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("UNTYPED")
                .to_string(),
            known => known
                .kind()
                .map(|kind| kind.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}
