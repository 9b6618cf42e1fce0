//! In-memory ledger
//!
//! Applies the registry, certificate and ERC-20 rules the orchestrator relies
//! on, records the signer of every transaction, and can be told to reject a
//! named call to exercise failure paths.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

use super::LedgerClient;
use crate::error::LedgerError;
use crate::identity::{Identity, PrivateKey};
use crate::models::*;

/// Initial supply minted by a test settlement token deployment
pub const TEST_TOKEN_SUPPLY: u64 = 1_000_000;

/// Address controlled by `key` on this ledger
pub fn derive_address(key: &PrivateKey) -> Address {
    hashed_address(key.expose().as_bytes())
}

fn hashed_address(seed: &[u8]) -> Address {
    let digest = Sha256::digest(seed);
    Address::new(format!("0x{}", hex::encode(&digest[12..])))
}

/// A confirmed mutating call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub method: String,
    pub signer: Address,
    pub subject: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenState {
    pub balances: BTreeMap<Address, u64>,
    /// owner -> spender -> amount
    pub allowances: BTreeMap<Address, BTreeMap<Address, u64>>,
}

/// Complete ledger contents; serializable for the binary's state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub producing_assets: BTreeMap<u64, Asset>,
    #[serde(default)]
    pub consuming_assets: BTreeMap<u64, Asset>,
    #[serde(default)]
    pub certificates: BTreeMap<u64, Certificate>,
    #[serde(default)]
    pub tokens: BTreeMap<Address, TokenState>,
    #[serde(default)]
    pub next_certificate_id: u64,
    #[serde(default)]
    pub next_contract_nonce: u64,
    #[serde(default)]
    pub journal: Vec<LedgerTransaction>,
    /// Spender accepted by `buy_certificate` besides the seller
    pub certificate_contract: Address,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            producing_assets: BTreeMap::new(),
            consuming_assets: BTreeMap::new(),
            certificates: BTreeMap::new(),
            tokens: BTreeMap::new(),
            next_certificate_id: 0,
            next_contract_nonce: 0,
            journal: Vec::new(),
            certificate_contract: hashed_address(b"certificate-logic"),
        }
    }
}

impl LedgerState {
    fn assets(&self, kind: AssetKind) -> &BTreeMap<u64, Asset> {
        match kind {
            AssetKind::Producing => &self.producing_assets,
            AssetKind::Consuming => &self.consuming_assets,
        }
    }

    fn assets_mut(&mut self, kind: AssetKind) -> &mut BTreeMap<u64, Asset> {
        match kind {
            AssetKind::Producing => &mut self.producing_assets,
            AssetKind::Consuming => &mut self.consuming_assets,
        }
    }

    fn asset_mut(&mut self, asset: AssetRef) -> Result<&mut Asset, LedgerError> {
        self.assets_mut(asset.kind)
            .get_mut(&asset.id.0)
            .ok_or_else(|| LedgerError::NotFound(asset.to_string()))
    }

    fn certificate_mut(&mut self, id: CertificateId) -> Result<&mut Certificate, LedgerError> {
        self.certificates
            .get_mut(&id.0)
            .ok_or_else(|| LedgerError::NotFound(format!("certificate #{}", id)))
    }

    /// Active certificate owned by the signer
    fn owned_active(
        &mut self,
        id: CertificateId,
        signer: &Identity,
    ) -> Result<&mut Certificate, LedgerError> {
        let cert = self.certificate_mut(id)?;
        if cert.owner != signer.address {
            return Err(LedgerError::Unauthorized {
                signer: signer.address.clone(),
                reason: format!("not the owner of certificate #{}", id),
            });
        }
        if cert.status != CertificateStatus::Active {
            return Err(LedgerError::Rejected(format!(
                "certificate #{} is {:?}",
                id, cert.status
            )));
        }
        Ok(cert)
    }

    fn token_mut(&mut self, token: &Address) -> Result<&mut TokenState, LedgerError> {
        self.tokens
            .get_mut(token)
            .ok_or_else(|| LedgerError::NotFound(format!("token contract {}", token)))
    }

    fn token(&self, token: &Address) -> Result<&TokenState, LedgerError> {
        self.tokens
            .get(token)
            .ok_or_else(|| LedgerError::NotFound(format!("token contract {}", token)))
    }

    fn record(&mut self, method: &str, signer: &Identity, subject: impl Into<String>) {
        self.journal.push(LedgerTransaction {
            method: method.to_string(),
            signer: signer.address.clone(),
            subject: subject.into(),
        });
    }
}

struct Inner {
    state: LedgerState,
    /// method -> reason, consumed by the next matching call
    rejections: BTreeMap<String, String>,
}

/// Reference [`LedgerClient`] holding all state in memory.
pub struct InMemoryLedger {
    inner: RwLock<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::from_state(LedgerState::default())
    }

    pub fn from_state(state: LedgerState) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state,
                rejections: BTreeMap::new(),
            }),
        }
    }

    /// Load a state file; a missing file yields an empty ledger.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_state(serde_json::from_str(&content)?))
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let state = self.snapshot().await;
        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.inner.read().await.state.clone()
    }

    pub async fn transactions(&self) -> Vec<LedgerTransaction> {
        self.inner.read().await.state.journal.clone()
    }

    /// Point purchases at the configured certificate logic contract.
    pub async fn bind_certificate_contract(&self, contract: &Address) {
        self.inner.write().await.state.certificate_contract = contract.clone();
    }

    /// Make the next call to `method` fail with `reason`.
    pub async fn reject_next(&self, method: &str, reason: impl Into<String>) {
        self.inner
            .write()
            .await
            .rejections
            .insert(method.to_string(), reason.into());
    }

    // --- seeding (registry operations performed outside the orchestrator) ---

    pub async fn register_asset(
        &self,
        kind: AssetKind,
        owner: &Address,
        smart_meter: &Address,
    ) -> AssetRef {
        let mut inner = self.inner.write().await;
        let assets = inner.state.assets_mut(kind);
        let id = assets.keys().next_back().map(|last| last + 1).unwrap_or(0);
        assets.insert(
            id,
            Asset {
                id: AssetId(id),
                kind,
                owner: owner.clone(),
                smart_meter: smart_meter.clone(),
                latest_meter_reading: 0,
                latest_file_hash: String::new(),
                market_lookup: None,
            },
        );
        AssetRef { kind, id: AssetId(id) }
    }

    /// Issue a certificate for an initialized producing asset.
    pub async fn issue_certificate(
        &self,
        asset: AssetId,
        power_in_w: u64,
    ) -> Result<CertificateId, LedgerError> {
        let mut inner = self.inner.write().await;
        let state = &mut inner.state;
        let owner = {
            let reference = AssetRef { kind: AssetKind::Producing, id: asset };
            let source = state
                .producing_assets
                .get(&asset.0)
                .ok_or_else(|| LedgerError::NotFound(reference.to_string()))?;
            if source.market_lookup.is_none() {
                return Err(LedgerError::Rejected(format!(
                    "certificates not initialized for asset #{}",
                    asset
                )));
            }
            source.owner.clone()
        };

        let id = CertificateId(state.next_certificate_id);
        state.next_certificate_id += 1;
        state.certificates.insert(
            id.0,
            Certificate {
                id,
                asset_id: asset,
                owner,
                power_in_w,
                children: Vec::new(),
                parent: None,
                tradable_token: None,
                price_in_token: None,
                status: CertificateStatus::Active,
            },
        );
        Ok(id)
    }

    /// Signature check plus injected rejection; run before any mutation.
    fn admit(inner: &mut Inner, method: &str, signer: &Identity) -> Result<(), LedgerError> {
        if let Some(reason) = inner.rejections.remove(method) {
            debug!(method, reason = %reason, "Injected rejection");
            return Err(LedgerError::Rejected(reason));
        }
        if derive_address(&signer.private_key) != signer.address {
            return Err(LedgerError::Unauthorized {
                signer: signer.address.clone(),
                reason: "private key does not control this address".to_string(),
            });
        }
        Ok(())
    }

    async fn read_gate(&self, method: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        match inner.rejections.remove(method) {
            Some(reason) => Err(LedgerError::Network(reason)),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn account_address(&self, key: &PrivateKey) -> Result<Address, LedgerError> {
        Ok(derive_address(key))
    }

    async fn asset(&self, asset: AssetRef) -> Result<Asset, LedgerError> {
        self.read_gate("asset").await?;
        let inner = self.inner.read().await;
        inner
            .state
            .assets(asset.kind)
            .get(&asset.id.0)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(asset.to_string()))
    }

    async fn save_smart_meter_read(
        &self,
        asset: AssetRef,
        reading: u64,
        file_hash: &str,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "save_smart_meter_read", signer)?;
        let state = &mut inner.state;
        let entry = state.asset_mut(asset)?;

        if entry.smart_meter != signer.address {
            return Err(LedgerError::Unauthorized {
                signer: signer.address.clone(),
                reason: format!("not the smart meter of {}", asset),
            });
        }
        if reading < entry.latest_meter_reading {
            return Err(LedgerError::Rejected(format!(
                "meter read {} is lower than latest {}",
                reading, entry.latest_meter_reading
            )));
        }

        entry.latest_meter_reading = reading;
        entry.latest_file_hash = file_hash.to_string();
        state.record("save_smart_meter_read", signer, asset.to_string());
        Ok(())
    }

    async fn set_market_lookup_contract(
        &self,
        asset: AssetId,
        lookup: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "set_market_lookup_contract", signer)?;
        let state = &mut inner.state;
        let reference = AssetRef { kind: AssetKind::Producing, id: asset };
        let entry = state.asset_mut(reference)?;

        if entry.owner != signer.address {
            return Err(LedgerError::Unauthorized {
                signer: signer.address.clone(),
                reason: format!("not the owner of {}", reference),
            });
        }

        entry.market_lookup = Some(lookup.clone());
        state.record("set_market_lookup_contract", signer, reference.to_string());
        Ok(())
    }

    async fn certificate(&self, id: CertificateId) -> Result<Certificate, LedgerError> {
        self.read_gate("certificate").await?;
        let inner = self.inner.read().await;
        inner
            .state
            .certificates
            .get(&id.0)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("certificate #{}", id)))
    }

    async fn certificate_balance(&self, owner: &Address) -> Result<u64, LedgerError> {
        self.read_gate("certificate_balance").await?;
        let inner = self.inner.read().await;
        let held = inner
            .state
            .certificates
            .values()
            .filter(|c| &c.owner == owner && c.status != CertificateStatus::Split)
            .count();
        Ok(held as u64)
    }

    async fn transfer_certificate(
        &self,
        id: CertificateId,
        to: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "transfer_certificate", signer)?;
        let state = &mut inner.state;
        let cert = state.owned_active(id, signer)?;
        cert.owner = to.clone();
        state.record("transfer_certificate", signer, format!("certificate #{}", id));
        Ok(())
    }

    async fn split_certificate(
        &self,
        id: CertificateId,
        power_in_w: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "split_certificate", signer)?;
        let state = &mut inner.state;
        let first = CertificateId(state.next_certificate_id);
        let second = CertificateId(state.next_certificate_id + 1);

        let parent = state.owned_active(id, signer)?;
        if power_in_w == 0 || power_in_w >= parent.power_in_w {
            return Err(LedgerError::Rejected(format!(
                "split value {} W must be between 0 and {} W",
                power_in_w, parent.power_in_w
            )));
        }

        let template = Certificate {
            id: first,
            asset_id: parent.asset_id,
            owner: parent.owner.clone(),
            power_in_w,
            children: Vec::new(),
            parent: Some(id),
            tradable_token: None,
            price_in_token: None,
            status: CertificateStatus::Active,
        };
        let remainder = Certificate {
            id: second,
            power_in_w: parent.power_in_w - power_in_w,
            ..template.clone()
        };

        parent.children = vec![first, second];
        parent.status = CertificateStatus::Split;

        state.certificates.insert(first.0, template);
        state.certificates.insert(second.0, remainder);
        state.next_certificate_id += 2;
        state.record("split_certificate", signer, format!("certificate #{}", id));
        Ok(())
    }

    async fn set_tradable_token(
        &self,
        id: CertificateId,
        token: &Address,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "set_tradable_token", signer)?;
        let state = &mut inner.state;
        state.token(token)?;
        let cert = state.owned_active(id, signer)?;
        cert.tradable_token = Some(token.clone());
        state.record("set_tradable_token", signer, format!("certificate #{}", id));
        Ok(())
    }

    async fn set_purchase_price(
        &self,
        id: CertificateId,
        price: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "set_purchase_price", signer)?;
        let state = &mut inner.state;
        let cert = state.owned_active(id, signer)?;
        cert.price_in_token = Some(price);
        state.record("set_purchase_price", signer, format!("certificate #{}", id));
        Ok(())
    }

    async fn buy_certificate(&self, id: CertificateId, signer: &Identity) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "buy_certificate", signer)?;
        let state = &mut inner.state;
        let contract = state.certificate_contract.clone();

        let (seller, token, price) = {
            let cert = state.certificate_mut(id)?;
            match (cert.status, &cert.tradable_token, cert.price_in_token) {
                (CertificateStatus::Active, Some(token), Some(price)) => {
                    (cert.owner.clone(), token.clone(), price)
                }
                (CertificateStatus::Active, _, _) => {
                    return Err(LedgerError::Rejected(format!(
                        "certificate #{} is not priced",
                        id
                    )))
                }
                (status, _, _) => {
                    return Err(LedgerError::Rejected(format!(
                        "certificate #{} is {:?}",
                        id, status
                    )))
                }
            }
        };
        if seller == signer.address {
            return Err(LedgerError::Rejected("owner cannot buy own certificate".to_string()));
        }

        let ledger_token = state.token_mut(&token)?;
        let granted = ledger_token.allowances.entry(signer.address.clone()).or_default();
        let spender = [&seller, &contract]
            .into_iter()
            .find(|spender| granted.get(*spender).copied().unwrap_or(0) >= price)
            .cloned()
            .ok_or_else(|| {
                LedgerError::Rejected(format!("allowance below price {}", price))
            })?;

        let buyer_balance = ledger_token.balances.get(&signer.address).copied().unwrap_or(0);
        if buyer_balance < price {
            return Err(LedgerError::Rejected(format!(
                "token balance {} below price {}",
                buyer_balance, price
            )));
        }

        if let Some(remaining) = granted.get_mut(&spender) {
            *remaining -= price;
        }
        ledger_token.balances.insert(signer.address.clone(), buyer_balance - price);
        *ledger_token.balances.entry(seller).or_default() += price;

        let cert = state.certificate_mut(id)?;
        cert.owner = signer.address.clone();
        cert.status = CertificateStatus::Sold;
        state.record("buy_certificate", signer, format!("certificate #{}", id));
        Ok(())
    }

    async fn certificate_contract(&self) -> Result<Address, LedgerError> {
        Ok(self.inner.read().await.state.certificate_contract.clone())
    }

    async fn deploy_settlement_token(
        &self,
        holder: &Address,
        signer: &Identity,
    ) -> Result<Address, LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "deploy_settlement_token", signer)?;
        let state = &mut inner.state;
        let nonce = state.next_contract_nonce;
        state.next_contract_nonce += 1;

        let address = hashed_address(format!("settlement-token:{}", nonce).as_bytes());
        let mut token = TokenState::default();
        token.balances.insert(holder.clone(), TEST_TOKEN_SUPPLY);
        state.tokens.insert(address.clone(), token);
        state.record("deploy_settlement_token", signer, address.to_string());
        Ok(address)
    }

    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: u64,
        signer: &Identity,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        Self::admit(&mut inner, "approve", signer)?;
        let state = &mut inner.state;
        state
            .token_mut(token)?
            .allowances
            .entry(signer.address.clone())
            .or_default()
            .insert(spender.clone(), amount);
        state.record("approve", signer, format!("{} -> {}", token, spender));
        Ok(())
    }

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<u64, LedgerError> {
        self.read_gate("allowance").await?;
        let inner = self.inner.read().await;
        let token = inner.state.token(token)?;
        Ok(token
            .allowances
            .get(owner)
            .and_then(|granted| granted.get(spender))
            .copied()
            .unwrap_or(0))
    }

    async fn token_balance(&self, token: &Address, holder: &Address) -> Result<u64, LedgerError> {
        self.read_gate("token_balance").await?;
        let inner = self.inner.read().await;
        let token = inner.state.token(token)?;
        Ok(token.balances.get(holder).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(seed: u8) -> Identity {
        let key = PrivateKey::parse(&format!("{:02x}", seed).repeat(32)).unwrap();
        Identity::new(derive_address(&key), key)
    }

    #[tokio::test]
    async fn test_forged_address_is_unauthorized() {
        let ledger = InMemoryLedger::new();
        let owner = identity(1);
        let forged = Identity::new(identity(2).address, owner.private_key.clone());

        let result = ledger.deploy_settlement_token(&owner.address, &forged).await;
        assert!(matches!(result, Err(LedgerError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_issue_requires_initialized_asset() {
        let ledger = InMemoryLedger::new();
        let owner = identity(1);
        let asset = ledger
            .register_asset(AssetKind::Producing, &owner.address, &identity(3).address)
            .await;

        assert!(ledger.issue_certificate(asset.id, 100).await.is_err());

        ledger
            .set_market_lookup_contract(asset.id, &Address::new("0x10"), &owner)
            .await
            .unwrap();
        let id = ledger.issue_certificate(asset.id, 100).await.unwrap();
        assert_eq!(ledger.certificate(id).await.unwrap().owner, owner.address);
    }

    #[tokio::test]
    async fn test_rejection_is_consumed_once() {
        let ledger = InMemoryLedger::new();
        let owner = identity(1);
        ledger.reject_next("deploy_settlement_token", "out of gas").await;

        let first = ledger.deploy_settlement_token(&owner.address, &owner).await;
        assert_eq!(first, Err(LedgerError::Rejected("out of gas".to_string())));
        assert!(ledger.deploy_settlement_token(&owner.address, &owner).await.is_ok());
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bound_certificate_contract_is_accepted_as_spender() {
        let ledger = InMemoryLedger::new();
        let contract = Address::new("0x3000");
        ledger.bind_certificate_contract(&contract).await;
        assert_eq!(ledger.certificate_contract().await.unwrap(), contract);

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
        ledger.set_purchase_price(id, 70, &owner).await.unwrap();
        ledger.approve(&token, &contract, 70, &buyer).await.unwrap();

        ledger.buy_certificate(id, &buyer).await.unwrap();
        assert_eq!(ledger.certificate(id).await.unwrap().owner, buyer.address);
        assert_eq!(ledger.token_balance(&token, &owner.address).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_state_survives_save_and_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let owner = identity(1);

        let ledger = InMemoryLedger::new();
        let token = ledger.deploy_settlement_token(&owner.address, &owner).await.unwrap();
        ledger.save(&path).await.unwrap();

        let reopened = InMemoryLedger::open(&path).unwrap();
        assert_eq!(
            reopened.token_balance(&token, &owner.address).await.unwrap(),
            TEST_TOKEN_SUPPLY
        );
    }
}
