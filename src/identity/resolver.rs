use tracing::{debug, warn};

use super::role::Role;
use super::store::ProfileStore;

/// Destination chosen once per authentication event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    Home,
    Admin,
    DeepLink(String),
}

impl RedirectTarget {
    pub fn as_path(&self) -> &str {
        match self {
            RedirectTarget::Home => "/",
            RedirectTarget::Admin => "/admin",
            RedirectTarget::DeepLink(p) => p,
        }
    }
}

/// A same-origin relative path other than the bare root.
pub fn is_deep_link(path: &str) -> bool {
    path.starts_with('/') && path != "/"
}

/// Pick the landing page after sign-in. An explicit deep link wins without
/// touching the store; otherwise one profile lookup decides between `/admin`
/// and `/`. Lookup failures land on `/`.
pub async fn resolve_redirect(
    store: &dyn ProfileStore,
    intended: Option<&str>,
    identity_id: &str,
) -> RedirectTarget {
    if let Some(path) = intended.filter(|p| is_deep_link(p)) {
        debug!(target: "auth", identity = identity_id, path, "redirect to deep link");
        return RedirectTarget::DeepLink(path.to_string());
    }
    let role = match store.select_by_id(identity_id).await {
        Ok(Some(profile)) => profile.role(),
        Ok(None) => Role::User,
        Err(e) => {
            warn!(target: "auth", identity = identity_id, error = %e, "profile lookup failed during redirect");
            Role::User
        }
    };
    match role {
        Role::Admin => RedirectTarget::Admin,
        Role::User => RedirectTarget::Home,
    }
}
