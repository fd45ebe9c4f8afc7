//! Backend selection: where identities and profiles live.

use std::sync::Arc;

use reqwest::Url;

use super::hub::SessionHub;
use super::memory::{MemoryBackend, MemoryProfileStore};
use super::provider::{AuthError, CapabilityProvider, IdentityAdmin};
use super::rest::{RestAdmin, RestApi, RestAuth, RestProfileStore};
use super::store::ProfileStore;

/// Hands out per-client views of one backend.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn provider(&self, hub: Arc<SessionHub>) -> Arc<dyn CapabilityProvider>;

    /// Profile store acting for the client that owns `hub`.
    fn profiles(&self, hub: Arc<SessionHub>) -> Arc<dyn ProfileStore>;

    fn identity_admin(&self) -> Option<Arc<dyn IdentityAdmin>>;
}

/// Everything in process. Used for local runs and tests.
#[derive(Default)]
pub struct MemoryStack {
    pub directory: Arc<MemoryBackend>,
    pub profiles: Arc<MemoryProfileStore>,
}

impl MemoryStack {
    pub fn new() -> Self {
        Self { directory: MemoryBackend::new(), profiles: Arc::new(MemoryProfileStore::new()) }
    }
}

impl Backend for MemoryStack {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn provider(&self, hub: Arc<SessionHub>) -> Arc<dyn CapabilityProvider> {
        Arc::new(self.directory.client(hub))
    }

    fn profiles(&self, _hub: Arc<SessionHub>) -> Arc<dyn ProfileStore> {
        self.profiles.clone()
    }

    fn identity_admin(&self) -> Option<Arc<dyn IdentityAdmin>> {
        Some(self.directory.clone() as Arc<dyn IdentityAdmin>)
    }
}

pub struct RestStack {
    api: Arc<RestApi>,
}

impl RestStack {
    pub fn new(base: Url, publishable_key: &str, service_key: Option<String>) -> Result<Self, AuthError> {
        Ok(Self { api: Arc::new(RestApi::new(base, publishable_key, service_key)?) })
    }
}

impl Backend for RestStack {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn provider(&self, hub: Arc<SessionHub>) -> Arc<dyn CapabilityProvider> {
        Arc::new(RestAuth::new(self.api.clone(), hub))
    }

    fn profiles(&self, hub: Arc<SessionHub>) -> Arc<dyn ProfileStore> {
        Arc::new(RestProfileStore::new(self.api.clone(), Some(hub)))
    }

    fn identity_admin(&self) -> Option<Arc<dyn IdentityAdmin>> {
        RestAdmin::new(self.api.clone()).map(|a| Arc::new(a) as Arc<dyn IdentityAdmin>)
    }
}
