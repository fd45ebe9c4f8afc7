use tracing::{info, warn};

use super::model::{Identity, Profile, ProfileUpsert};
use super::store::{ProfileStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// Row already had a name; nothing written.
    Existing(Profile),
    /// No row existed; one was created.
    Created(Profile),
    /// Row existed without a name; name filled in, bio kept.
    Repaired(Profile),
}

impl BootstrapOutcome {
    pub fn profile(&self) -> &Profile {
        match self {
            BootstrapOutcome::Existing(p) | BootstrapOutcome::Created(p) | BootstrapOutcome::Repaired(p) => p,
        }
    }

    pub fn into_profile(self) -> Profile {
        match self {
            BootstrapOutcome::Existing(p) | BootstrapOutcome::Created(p) | BootstrapOutcome::Repaired(p) => p,
        }
    }

    pub fn wrote(&self) -> bool {
        !matches!(self, BootstrapOutcome::Existing(_))
    }
}

/// Name stored for identities with neither a metadata name nor an email.
pub const FALLBACK_DISPLAY_NAME: &str = "user";

/// Default display name: the stored name, then the identity's metadata name,
/// then the local part of the email. Never empty.
pub fn derive_display_name(profile: Option<&Profile>, identity: &Identity) -> String {
    if let Some(name) = profile.and_then(|p| p.name.as_deref()).map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = identity.metadata_name() {
        return name.to_string();
    }
    match identity.email_local_part().trim() {
        "" => FALLBACK_DISPLAY_NAME.to_string(),
        local => local.to_string(),
    }
}

/// Make sure `identity` has a profile row with a non-empty name. Idempotent:
/// once a name is stored, later calls only read.
pub async fn ensure_profile(store: &dyn ProfileStore, identity: &Identity) -> Result<BootstrapOutcome, StoreError> {
    let existing = store.select_by_id(&identity.id).await?;
    if let Some(p) = existing.as_ref().filter(|p| p.has_name()) {
        return Ok(BootstrapOutcome::Existing(p.clone()));
    }
    let name = derive_display_name(existing.as_ref(), identity);
    let row = ProfileUpsert {
        id: identity.id.clone(),
        email: identity.email.clone(),
        name: Some(name),
        bio: Some(existing.as_ref().and_then(|p| p.bio.clone()).unwrap_or_default()),
    };
    let written = store.upsert(&row).await.inspect_err(|e| {
        warn!(target: "auth", identity = %identity.id, error = %e, "profile bootstrap write failed");
    })?;
    info!(target: "auth", identity = %identity.id, created = existing.is_none(), "profile bootstrapped");
    Ok(match existing {
        None => BootstrapOutcome::Created(written),
        Some(_) => BootstrapOutcome::Repaired(written),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::CountingStore;
    use crate::identity::MemoryProfileStore;
    use serde_json::json;

    fn identity(email: &str, meta: serde_json::Value) -> Identity {
        Identity {
            id: "id-1".into(),
            email: Some(email.into()),
            metadata: meta.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn name_priority() {
        let ident = identity("sam@site.io", json!({"full_name": "Sam Smith"}));
        let mut p = Profile::new("id-1");
        p.name = Some("Samwise".into());
        assert_eq!(derive_display_name(Some(&p), &ident), "Samwise");
        p.name = Some("   ".into());
        assert_eq!(derive_display_name(Some(&p), &ident), "Sam Smith");
        assert_eq!(derive_display_name(None, &identity("sam@site.io", json!({}))), "sam");
    }

    #[tokio::test]
    async fn identity_without_email_or_name_is_bootstrapped_once() {
        let store = CountingStore::new(MemoryProfileStore::new());
        let ident = Identity { id: "id-1".into(), ..Default::default() };

        let first = ensure_profile(&store, &ident).await.unwrap();
        assert_eq!(first.profile().name.as_deref(), Some(FALLBACK_DISPLAY_NAME));

        store.reset_counts();
        let second = ensure_profile(&store, &ident).await.unwrap();
        assert!(!second.wrote());
        assert_eq!(store.counts().upsert, 0);
    }

    #[tokio::test]
    async fn second_run_does_not_write() {
        let store = CountingStore::new(MemoryProfileStore::new());
        let ident = identity("kim@site.io", json!({"user_name": "kimchi"}));

        let first = ensure_profile(&store, &ident).await.unwrap();
        assert!(matches!(first, BootstrapOutcome::Created(_)));
        assert_eq!(first.profile().name.as_deref(), Some("kimchi"));
        assert_eq!(store.counts().upsert, 1);

        store.reset_counts();
        let second = ensure_profile(&store, &ident).await.unwrap();
        assert!(!second.wrote());
        assert_eq!(second.profile().name.as_deref(), Some("kimchi"));
        assert_eq!(store.counts().upsert, 0);
    }

    #[tokio::test]
    async fn repair_keeps_bio() {
        let mem = MemoryProfileStore::new();
        let mut p = Profile::new("id-1");
        p.bio = Some("likes birds".into());
        mem.insert(p);
        let store = CountingStore::new(mem);
        let out = ensure_profile(&store, &identity("lee@site.io", json!({}))).await.unwrap();
        assert!(matches!(out, BootstrapOutcome::Repaired(_)));
        assert_eq!(out.profile().name.as_deref(), Some("lee"));
        assert_eq!(out.profile().bio.as_deref(), Some("likes birds"));
    }
}
