//! Signing identities
//!
//! Every action resolves exactly one signing identity before its first ledger
//! call. The resolved identity lives in an [`ActionContext`] built fresh for
//! that action and never mutated afterwards.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::action::Action;
use crate::error::{OrchestratorError, Result};
use crate::models::Address;

/// Hex digits in a secp256k1 private key
const PRIVATE_KEY_HEX_LEN: usize = 64;

/// Private key string, always carrying the `0x` prefix
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Accepts the key with or without the `0x` prefix
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != PRIVATE_KEY_HEX_LEN || hex::decode(digits).is_err() {
            return Err(OrchestratorError::Config(format!(
                "private key must be {} hex digits",
                PRIVATE_KEY_HEX_LEN
            )));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut raw = String::deserialize(deserializer)?;
        let parsed = PrivateKey::parse(&raw).map_err(serde::de::Error::custom);
        raw.zeroize();
        parsed
    }
}

/// Address plus the key that signs for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: Address,
    pub private_key: PrivateKey,
}

impl Identity {
    pub fn new(address: Address, private_key: PrivateKey) -> Self {
        Self { address, private_key }
    }
}

/// Which party signs an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    MeterDevice,
    Administrator,
    AssetOwner,
    Buyer,
}

/// Selects the signing identity for an action
pub struct IdentityContext;

impl IdentityContext {
    /// Pure function of the action and its payload
    pub fn resolve(action: &Action, admin: &Identity) -> (SignerRole, Identity) {
        match action {
            Action::SaveSmartMeterReadProducing(read) | Action::SaveSmartMeterReadConsuming(read) => (
                SignerRole::MeterDevice,
                Identity::new(read.smart_meter.clone(), read.smart_meter_pk.clone()),
            ),
            Action::InitializeCertificates(_) | Action::Unrecognized(_) => {
                (SignerRole::Administrator, admin.clone())
            }
            Action::TransferCertificate(p) => (SignerRole::AssetOwner, p.owner.identity()),
            Action::SplitCertificate(p) => (SignerRole::AssetOwner, p.owner.identity()),
            Action::SetErc20Certificate(p) => (SignerRole::AssetOwner, p.owner.identity()),
            Action::BuyCertificate(p) => (
                SignerRole::Buyer,
                Identity::new(p.buyer.clone(), p.buyer_pk.clone()),
            ),
        }
    }
}

/// Immutable per-action state
#[derive(Debug, Clone)]
pub struct ActionContext {
    action_id: String,
    kind: String,
    role: SignerRole,
    identity: Identity,
}

impl ActionContext {
    pub fn new(kind: impl Into<String>, role: SignerRole, identity: Identity) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            role,
            identity,
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn role(&self) -> SignerRole {
        self.role
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn signer(&self) -> &Address {
        &self.identity.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

    #[test]
    fn test_prefix_is_normalized() {
        let bare = PrivateKey::parse(KEY).unwrap();
        let prefixed = PrivateKey::parse(&format!("0x{}", KEY)).unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.expose(), format!("0x{}", KEY));
    }

    #[test]
    fn test_malformed_keys_are_configuration_errors() {
        let not_hex = KEY.replace('4', "g");
        for bad in ["", "0x", "0x1234", not_hex.as_str()] {
            let err = PrivateKey::parse(bad).unwrap_err();
            assert!(matches!(err, OrchestratorError::Config(_)), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = PrivateKey::parse(KEY).unwrap();
        assert!(!format!("{:?}", key).contains("4f3edf"));
    }

    #[test]
    fn test_context_ids_are_unique() {
        let identity = Identity::new(Address::new("0x01"), PrivateKey::parse(KEY).unwrap());
        let a = ActionContext::new("SPLIT_CERTIFICATE", SignerRole::AssetOwner, identity.clone());
        let b = ActionContext::new("SPLIT_CERTIFICATE", SignerRole::AssetOwner, identity);
        assert_ne!(a.action_id(), b.action_id());
        assert_eq!(a.signer(), &Address::new("0x01"));
    }
}
