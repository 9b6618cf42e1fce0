//! Onboarding collaborator
//!
//! Descriptors with an unrecognized type are handed over unchanged, together
//! with the administrative key.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::identity::PrivateKey;

#[async_trait]
pub trait Onboarding: Send + Sync {
    async fn onboard(&self, serialized_action: &str, admin_key: &PrivateKey) -> Result<()>;
}

/// Logs forwarded descriptors; the binary's default
pub struct LogOnboarding;

#[async_trait]
impl Onboarding for LogOnboarding {
    async fn onboard(&self, serialized_action: &str, _admin_key: &PrivateKey) -> Result<()> {
        info!(action = serialized_action, "Forwarded to onboarding");
        Ok(())
    }
}

/// Keeps every forwarded descriptor
#[derive(Default)]
pub struct RecordingOnboarding {
    received: Mutex<Vec<(String, PrivateKey)>>,
}

impl RecordingOnboarding {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<(String, PrivateKey)> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl Onboarding for RecordingOnboarding {
    async fn onboard(&self, serialized_action: &str, admin_key: &PrivateKey) -> Result<()> {
        self.received
            .lock()
            .await
            .push((serialized_action.to_string(), admin_key.clone()));
        Ok(())
    }
}
