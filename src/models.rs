//! Ledger entity snapshots and action reports
//!
//! Snapshots are plain values: the orchestrator never mutates them in place,
//! it rebinds to the snapshot returned by the next reload.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{FailureKind, OrchestratorError, Result};

//=============================================================================
// IDENTIFIERS
//=============================================================================

/// Ledger account or contract address, kept lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric identifiers arrive either as JSON numbers or numeric strings
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericId {
    Number(u64),
    Text(String),
}

pub(crate) fn deserialize_numeric<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumericId::deserialize(deserializer)? {
        NumericId::Number(n) => Ok(n),
        NumericId::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected numeric id, got {:?}", s))),
    }
}

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_numeric(deserializer).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(AssetId);
numeric_id!(CertificateId);

//=============================================================================
// ASSETS
//=============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Producing,
    Consuming,
}

/// Assets are addressed per registry: producing and consuming ids overlap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AssetRef {
    pub kind: AssetKind,
    pub id: AssetId,
}

impl AssetRef {
    pub fn producing(id: u64) -> Self {
        Self { kind: AssetKind::Producing, id: AssetId(id) }
    }

    pub fn consuming(id: u64) -> Self {
        Self { kind: AssetKind::Consuming, id: AssetId(id) }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AssetKind::Producing => "producing",
            AssetKind::Consuming => "consuming",
        };
        write!(f, "{} asset #{}", kind, self.id)
    }
}

/// Snapshot of a registered asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub owner: Address,
    /// Device allowed to report meter reads
    pub smart_meter: Address,
    pub latest_meter_reading: u64,
    pub latest_file_hash: String,
    /// Registry enabled for certificate issuance, set by initialization
    pub market_lookup: Option<Address>,
}

impl Asset {
    pub fn reference(&self) -> AssetRef {
        AssetRef { kind: self.kind, id: self.id }
    }
}

//=============================================================================
// CERTIFICATES
//=============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Active,
    /// Has children; permanent
    Split,
    Sold,
}

/// Snapshot of a certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub id: CertificateId,
    pub asset_id: AssetId,
    pub owner: Address,
    pub power_in_w: u64,
    pub children: Vec<CertificateId>,
    pub parent: Option<CertificateId>,
    pub tradable_token: Option<Address>,
    pub price_in_token: Option<u64>,
    pub status: CertificateStatus,
}

impl Certificate {
    /// Lifecycle operations are only defined on active certificates
    pub fn ensure_active(&self, operation: &'static str) -> Result<()> {
        if self.status == CertificateStatus::Active {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                certificate: self.id,
                status: self.status,
                operation,
            })
        }
    }

    /// Both pricing sub-steps have landed
    pub fn is_purchasable(&self) -> bool {
        self.status == CertificateStatus::Active
            && self.tradable_token.is_some()
            && self.price_in_token.is_some()
    }
}

//=============================================================================
// REPORTS
//=============================================================================

/// Outcome of one dispatched action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub action_id: String,
    /// Action type as received
    pub kind: String,
    /// Address that signed the action's transactions
    pub signer: Option<Address>,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub failure: Option<FailureKind>,
    pub details: Option<serde_json::Value>,
}
