//! Entity synchronization
//!
//! Ledger-backed entities are handled as immutable snapshots. A mutation is
//! always `load -> commit -> reload`: [`EntitySync::commit`] takes the stale
//! snapshot by value, awaits the confirmed transaction, and hands back a
//! snapshot fetched after confirmation. Callers rebind to the returned value,
//! so nothing downstream can read pre-mutation state.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use tracing::debug;

use crate::error::{LedgerError, LedgerResultExt, Result};
use crate::identity::ActionContext;
use crate::ledger::LedgerClient;
use crate::models::{Asset, AssetRef, Certificate, CertificateId};

/// An entity whose authoritative state lives on the ledger
#[async_trait]
pub trait SyncedEntity: Clone + Send + Sync + Sized {
    type Id: Copy + fmt::Display + Send + Sync;

    /// Name used in logs and error messages
    const ENTITY: &'static str;

    fn entity_id(&self) -> Self::Id;

    async fn fetch(ledger: &dyn LedgerClient, id: Self::Id) -> std::result::Result<Self, LedgerError>;
}

#[async_trait]
impl SyncedEntity for Asset {
    type Id = AssetRef;
    const ENTITY: &'static str = "asset";

    fn entity_id(&self) -> AssetRef {
        self.reference()
    }

    async fn fetch(ledger: &dyn LedgerClient, id: AssetRef) -> std::result::Result<Self, LedgerError> {
        ledger.asset(id).await
    }
}

#[async_trait]
impl SyncedEntity for Certificate {
    type Id = CertificateId;
    const ENTITY: &'static str = "certificate";

    fn entity_id(&self) -> CertificateId {
        self.id
    }

    async fn fetch(
        ledger: &dyn LedgerClient,
        id: CertificateId,
    ) -> std::result::Result<Self, LedgerError> {
        ledger.certificate(id).await
    }
}

/// Snapshot access scoped to one action
pub struct EntitySync<'a> {
    ledger: &'a dyn LedgerClient,
    context: &'a ActionContext,
}

impl<'a> EntitySync<'a> {
    pub fn new(ledger: &'a dyn LedgerClient, context: &'a ActionContext) -> Self {
        Self { ledger, context }
    }

    pub fn ledger(&self) -> &'a dyn LedgerClient {
        self.ledger
    }

    pub fn context(&self) -> &'a ActionContext {
        self.context
    }

    /// Fetch the current snapshot of `id`
    pub async fn load<E: SyncedEntity>(&self, id: E::Id) -> Result<E> {
        debug!(
            action_id = %self.context.action_id(),
            entity = E::ENTITY,
            id = %id,
            "Loading snapshot"
        );
        E::fetch(self.ledger, id).await.during("load")
    }

    /// Re-fetch a snapshot, superseding the one passed in
    pub async fn reload<E: SyncedEntity>(&self, stale: E) -> Result<E> {
        let id = stale.entity_id();
        drop(stale);
        debug!(
            action_id = %self.context.action_id(),
            entity = E::ENTITY,
            id = %id,
            "Reloading snapshot"
        );
        E::fetch(self.ledger, id).await.during("reload")
    }

    /// Await a confirmed mutation of `stale`, then reload it
    pub async fn commit<E, F>(&self, stale: E, operation: &'static str, transaction: F) -> Result<E>
    where
        E: SyncedEntity,
        F: Future<Output = std::result::Result<(), LedgerError>> + Send,
    {
        debug!(
            action_id = %self.context.action_id(),
            signer = %self.context.signer(),
            entity = E::ENTITY,
            id = %stale.entity_id(),
            operation,
            "Submitting transaction"
        );
        transaction.await.during(operation)?;
        self.reload(stale).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, PrivateKey, SignerRole};
    use crate::ledger::memory::derive_address;
    use crate::ledger::InMemoryLedger;
    use crate::models::{Address, AssetKind};

    fn identity(seed: u8) -> Identity {
        let key = PrivateKey::parse(&format!("{:02x}", seed).repeat(32)).unwrap();
        Identity::new(derive_address(&key), key)
    }

    #[tokio::test]
    async fn test_commit_returns_post_mutation_snapshot() {
        let ledger = InMemoryLedger::new();
        let meter = identity(4);
        let asset_ref = ledger
            .register_asset(AssetKind::Consuming, &identity(1).address, &meter.address)
            .await;
        let context = ActionContext::new(
            "SAVE_SMARTMETER_READ_CONSUMING",
            SignerRole::MeterDevice,
            meter.clone(),
        );
        let sync = EntitySync::new(&ledger, &context);

        let asset: Asset = sync.load(asset_ref).await.unwrap();
        assert_eq!(asset.latest_meter_reading, 0);

        let asset = sync
            .commit(
                asset,
                "save meter read",
                ledger.save_smart_meter_read(asset_ref, 42, "QmFile", &meter),
            )
            .await
            .unwrap();
        assert_eq!(asset.latest_meter_reading, 42);
        assert_eq!(asset.latest_file_hash, "QmFile");
    }

    #[tokio::test]
    async fn test_reload_without_mutation_is_identical() {
        let ledger = InMemoryLedger::new();
        let owner = identity(1);
        let asset_ref = ledger
            .register_asset(AssetKind::Producing, &owner.address, &identity(2).address)
            .await;
        let context = ActionContext::new("TEST", SignerRole::Administrator, owner);
        let sync = EntitySync::new(&ledger, &context);

        let first: Asset = sync.reload(sync.load::<Asset>(asset_ref).await.unwrap()).await.unwrap();
        let second = sync.reload(first.clone()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_transaction_skips_reload() {
        let ledger = InMemoryLedger::new();
        let meter = identity(4);
        let asset_ref = ledger
            .register_asset(AssetKind::Producing, &Address::new("0x01"), &meter.address)
            .await;
        let context = ActionContext::new("TEST", SignerRole::MeterDevice, meter.clone());
        let sync = EntitySync::new(&ledger, &context);
        let asset: Asset = sync.load(asset_ref).await.unwrap();

        let err = sync
            .commit(asset, "save meter read", async {
                Err::<(), _>(LedgerError::Rejected("reverted".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "save meter read failed: transaction rejected: reverted");
    }
}
