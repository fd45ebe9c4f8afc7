//! In-process identity directory and profile table.
//!
//! Backs `DETECTIFY_BACKEND=memory` for local development and the integration
//! tests. Behaviour follows the hosted provider where it matters to the flows
//! in this crate: codes are single use, unconfirmed emails cannot sign in,
//! password reset and resend never reveal whether an address exists.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use password_hash::{PasswordHash, SaltString};
use serde_json::{Map, Value};

use super::hub::{SessionHub, SessionSubscription};
use super::model::{Identity, LinkedMethod, Profile, ProfilePatch, ProfileUpsert, Session, UserUpdate};
use super::provider::{AuthError, CapabilityProvider, IdentityAdmin, OAuthProvider, SignUpResult};
use super::role::Role;
use super::store::{ProfileStore, StoreError};
use crate::tprintln;

fn gen_token() -> Result<String, AuthError> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| AuthError::Transport(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::Transport(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Transport(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Transport(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Mail the provider would have sent. `link` carries a single-use code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    PasswordReset { email: String, link: String },
    Verification { email: String, link: String },
}

impl Outbound {
    pub fn link(&self) -> &str {
        match self {
            Outbound::PasswordReset { link, .. } | Outbound::Verification { link, .. } => link,
        }
    }
}

fn with_code(redirect_to: &str, code: &str) -> String {
    let sep = if redirect_to.contains('?') { '&' } else { '?' };
    format!("{redirect_to}{sep}code={}", urlencoding::encode(code))
}

struct StoredUser {
    identity: Identity,
    password_hash: Option<String>,
    confirm_redirect: Option<String>,
}

struct CodeGrant {
    identity_id: String,
    confirms_email: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    users: RwLock<HashMap<String, StoredUser>>,
    by_email: RwLock<HashMap<String, String>>,
    codes: Mutex<HashMap<String, CodeGrant>>,
    tokens: RwLock<HashMap<String, String>>,
    outbox: Mutex<Vec<Outbound>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Register an email/password identity.
    pub fn register_password_user(
        &self,
        email: &str,
        password: &str,
        verified: bool,
        metadata: Map<String, Value>,
    ) -> Result<Identity, AuthError> {
        let key = email.to_lowercase();
        if self.by_email.read().contains_key(&key) {
            return Err(AuthError::rejected("user_already_exists", "User already registered"));
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            email_verified: verified,
            identities: vec![LinkedMethod { provider: "email".into() }],
            metadata,
        };
        let hash = hash_password(password)?;
        self.by_email.write().insert(key, identity.id.clone());
        self.users.write().insert(identity.id.clone(), StoredUser { identity: identity.clone(), password_hash: Some(hash), confirm_redirect: None });
        tprintln!("memory.register id={} email={}", identity.id, email);
        Ok(identity)
    }

    /// Find or create the identity an OAuth provider would hand back for `email`,
    /// linking the provider to an existing account with the same address.
    pub fn link_oauth_user(&self, provider: OAuthProvider, email: &str, metadata: Map<String, Value>) -> Identity {
        let key = email.to_lowercase();
        let existing = self.by_email.read().get(&key).cloned();
        let mut users = self.users.write();
        if let Some(user) = existing.and_then(|id| users.get_mut(&id)) {
            let identity = &mut user.identity;
            if !identity.identities.iter().any(|m| m.provider == provider.as_str()) {
                identity.identities.push(LinkedMethod { provider: provider.as_str().into() });
            }
            return identity.clone();
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            email_verified: true,
            identities: vec![LinkedMethod { provider: provider.as_str().into() }],
            metadata,
        };
        users.insert(identity.id.clone(), StoredUser { identity: identity.clone(), password_hash: None, confirm_redirect: None });
        drop(users);
        self.by_email.write().insert(key, identity.id.clone());
        identity
    }

    pub fn confirm_email(&self, identity_id: &str) {
        if let Some(u) = self.users.write().get_mut(identity_id) {
            u.identity.email_verified = true;
        }
    }

    /// Mint a single-use authorization code for `identity_id`.
    pub fn issue_code(&self, identity_id: &str) -> Result<String, AuthError> {
        self.grant(identity_id, false)
    }

    fn grant(&self, identity_id: &str, confirms_email: bool) -> Result<String, AuthError> {
        let code = gen_token()?;
        self.codes.lock().insert(code.clone(), CodeGrant { identity_id: identity_id.to_string(), confirms_email });
        Ok(code)
    }

    fn id_for_email(&self, email: &str) -> Option<String> {
        self.by_email.read().get(&email.trim().to_lowercase()).cloned()
    }

    fn send_verification(&self, identity_id: &str, email: &str) -> Result<(), AuthError> {
        let redirect = self.users.read().get(identity_id).and_then(|u| u.confirm_redirect.clone());
        let code = self.grant(identity_id, true)?;
        let link = with_code(redirect.as_deref().unwrap_or("/auth/callback"), &code);
        self.outbox.lock().push(Outbound::Verification { email: email.into(), link });
        Ok(())
    }

    pub fn identity(&self, identity_id: &str) -> Option<Identity> {
        self.users.read().get(identity_id).map(|u| u.identity.clone())
    }

    pub fn sent_mail(&self) -> Vec<Outbound> {
        self.outbox.lock().clone()
    }

    pub fn client(self: &Arc<Self>, hub: Arc<SessionHub>) -> MemoryAuthClient {
        MemoryAuthClient { backend: self.clone(), hub }
    }

    fn open_session(&self, identity_id: &str) -> Result<Session, AuthError> {
        let token = gen_token()?;
        let refresh_token = gen_token()?;
        self.tokens.write().insert(token.clone(), identity_id.to_string());
        Ok(Session {
            access_token: token,
            refresh_token: Some(refresh_token),
            identity_id: identity_id.to_string(),
            expires_at: Some(Utc::now().timestamp() + 3600),
        })
    }

    fn token_owner(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }
}

#[async_trait]
impl IdentityAdmin for MemoryBackend {
    async fn delete_identity(&self, identity_id: &str) -> Result<(), AuthError> {
        let Some(user) = self.users.write().remove(identity_id) else {
            return Err(AuthError::rejected("user_not_found", "User not found"));
        };
        if let Some(email) = user.identity.email {
            self.by_email.write().remove(&email.to_lowercase());
        }
        self.tokens.write().retain(|_, owner| owner != identity_id);
        self.codes.lock().retain(|_, grant| grant.identity_id != identity_id);
        Ok(())
    }
}

/// One client's view of a [`MemoryBackend`].
pub struct MemoryAuthClient {
    backend: Arc<MemoryBackend>,
    hub: Arc<SessionHub>,
}

impl MemoryAuthClient {
    fn require_session(&self) -> Result<Session, AuthError> {
        self.hub.current().ok_or(AuthError::NoSession)
    }
}

#[async_trait]
impl CapabilityProvider for MemoryAuthClient {
    async fn sign_up(&self, email: &str, password: &str, name: &str, email_redirect_to: &str) -> Result<SignUpResult, AuthError> {
        let mut meta = Map::new();
        if !name.trim().is_empty() {
            meta.insert("name".into(), Value::String(name.trim().to_string()));
        }
        let identity = self.backend.register_password_user(email, password, false, meta)?;
        if let Some(u) = self.backend.users.write().get_mut(&identity.id) {
            u.confirm_redirect = Some(email_redirect_to.to_string());
        }
        self.backend.send_verification(&identity.id, email)?;
        Ok(SignUpResult { identity, session: None })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let invalid = || AuthError::rejected("invalid_credentials", "Invalid login credentials");
        let id = self.backend.id_for_email(email).ok_or_else(invalid)?;
        let (verified, hash) = {
            let users = self.backend.users.read();
            let user = users.get(&id).ok_or_else(invalid)?;
            (user.identity.email_verified, user.password_hash.clone())
        };
        match hash {
            Some(h) if verify_password(&h, password) => {}
            _ => return Err(invalid()),
        }
        if !verified {
            return Err(AuthError::rejected("email_not_confirmed", "Email not confirmed"));
        }
        let session = self.backend.open_session(&id)?;
        self.hub.set(session.clone());
        Ok(session)
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<String, AuthError> {
        // Local stand-in for the consent screen: consent is granted immediately
        // and the browser goes straight back with a fresh code.
        let email = format!("{}-user@detectify.local", provider.as_str());
        let mut meta = Map::new();
        meta.insert("user_name".into(), Value::String(format!("{}-user", provider.as_str())));
        let identity = self.backend.link_oauth_user(provider, &email, meta);
        let code = self.backend.issue_code(&identity.id)?;
        Ok(with_code(redirect_to, &code))
    }

    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, AuthError> {
        let grant = self.backend.codes.lock().remove(code);
        let Some(CodeGrant { identity_id, confirms_email }) = grant else {
            return Err(AuthError::rejected("invalid_grant", "Authorization code is invalid or has already been used"));
        };
        if self.backend.identity(&identity_id).is_none() {
            return Err(AuthError::rejected("user_not_found", "User not found"));
        }
        if confirms_email {
            self.backend.confirm_email(&identity_id);
        }
        let session = self.backend.open_session(&identity_id)?;
        self.hub.set(session.clone());
        Ok(session)
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.hub.current() else { return Ok(None) };
        if self.backend.token_owner(&session.access_token).is_none() {
            // Revoked server-side (sign-out elsewhere, account deleted).
            self.hub.clear();
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn get_user(&self) -> Result<Option<Identity>, AuthError> {
        let Some(session) = self.get_session().await? else { return Ok(None) };
        Ok(self.backend.identity(&session.identity_id))
    }

    fn subscribe(&self) -> SessionSubscription {
        self.hub.subscribe()
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<(), AuthError> {
        let session = self.require_session()?;
        if let Some(pw) = update.password.as_deref() {
            let hash = hash_password(pw)?;
            let mut users = self.backend.users.write();
            let user = users.get_mut(&session.identity_id).ok_or(AuthError::NoSession)?;
            user.password_hash = Some(hash);
            if !user.identity.has_password_identity() {
                user.identity.identities.push(LinkedMethod { provider: "email".into() });
            }
        }
        self.hub.notify_user_updated();
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        // Unknown addresses succeed silently.
        if let Some(id) = self.backend.id_for_email(email) {
            let link = with_code(redirect_to, &self.backend.issue_code(&id)?);
            self.backend.outbox.lock().push(Outbound::PasswordReset { email: email.into(), link });
        }
        Ok(())
    }

    async fn resend_verification_email(&self, email: &str) -> Result<(), AuthError> {
        let pending = self
            .backend
            .id_for_email(email)
            .filter(|id| self.backend.identity(id).is_some_and(|i| !i.email_verified));
        if let Some(id) = pending {
            self.backend.send_verification(&id, email)?;
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.hub.clear() {
            self.backend.tokens.write().remove(&session.access_token);
        }
        Ok(())
    }
}

/// Profile relation held in a map.
#[derive(Default)]
pub struct MemoryProfileStore {
    rows: RwLock<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    /// Seed a row verbatim.
    pub fn insert(&self, profile: Profile) {
        self.rows.write().insert(profile.id.clone(), profile);
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.rows.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn select_by_id(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.get(id))
    }

    async fn upsert(&self, row: &ProfileUpsert) -> Result<Profile, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write();
        let entry = rows.entry(row.id.clone()).or_insert_with(|| Profile {
            role: Some(Role::User.as_str().into()),
            created_at: Some(now),
            ..Profile::new(row.id.clone())
        });
        if row.email.is_some() { entry.email = row.email.clone(); }
        if row.name.is_some() { entry.name = row.name.clone(); }
        if row.bio.is_some() { entry.bio = row.bio.clone(); }
        entry.updated_at = Some(now);
        Ok(entry.clone())
    }

    async fn update_by_id(&self, id: &str, patch: &ProfilePatch) -> Result<Profile, StoreError> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(n) = &patch.name { row.name = Some(n.clone()); }
        if let Some(b) = &patch.bio { row.bio = Some(b.clone()); }
        if let Some(r) = patch.role { row.role = Some(r.as_str().into()); }
        if let Some(t) = patch.updated_at { row.updated_at = Some(t); }
        Ok(row.clone())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.rows.write().remove(id).is_some())
    }

    async fn select_by_role(&self, role: Role) -> Result<Vec<Profile>, StoreError> {
        let mut out: Vec<Profile> = self
            .rows
            .read()
            .values()
            .filter(|p| p.role.as_deref() == Some(role.as_str()))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn select_many_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>, StoreError> {
        let rows = self.rows.read();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }
}
