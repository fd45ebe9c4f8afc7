use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{Profile, Session};
use super::provider::CapabilityProvider;
use super::role::Role;
use super::store::ProfileStore;

/// What an allowed admin request gets to work with.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminContext {
    pub session: Session,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow(AdminContext),
    /// No session; send to the login page and come back afterwards.
    RedirectToLogin { redirected_from: String },
    /// Signed in but not an admin. Silent.
    RedirectHome,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow(_))
    }
}

/// Checks every admin route entry. Nothing is cached between calls.
pub struct RoleGate {
    provider: Arc<dyn CapabilityProvider>,
    store: Arc<dyn ProfileStore>,
}

impl RoleGate {
    pub fn new(provider: Arc<dyn CapabilityProvider>, store: Arc<dyn ProfileStore>) -> Self {
        Self { provider, store }
    }

    pub async fn check(&self, attempted_path: &str) -> GateDecision {
        let session = match self.provider.get_session().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!(target: "gate", path = attempted_path, "no session");
                return GateDecision::RedirectToLogin { redirected_from: attempted_path.to_string() };
            }
            Err(e) => {
                warn!(target: "gate", path = attempted_path, error = %e, "session check failed");
                return GateDecision::RedirectToLogin { redirected_from: attempted_path.to_string() };
            }
        };
        let profile = match self.store.select_by_id(&session.identity_id).await {
            Ok(Some(p)) if p.role() == Role::Admin => p,
            Ok(_) => {
                info!(target: "gate", identity = %session.identity_id, path = attempted_path, "non-admin turned away");
                return GateDecision::RedirectHome;
            }
            Err(e) => {
                warn!(target: "gate", identity = %session.identity_id, error = %e, "role lookup failed");
                return GateDecision::RedirectHome;
            }
        };
        GateDecision::Allow(AdminContext { session, profile })
    }
}
