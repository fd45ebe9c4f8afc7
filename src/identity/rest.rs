//! Hosted backend over HTTP: GoTrue-style auth under `/auth/v1` and a
//! PostgREST `profiles` relation under `/rest/v1`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::hub::{SessionHub, SessionSubscription};
use super::model::{Identity, LinkedMethod, Profile, ProfilePatch, ProfileUpsert, Session, UserUpdate};
use super::provider::{AuthError, CapabilityProvider, IdentityAdmin, OAuthProvider, SignUpResult};
use super::role::Role;
use super::store::{ProfileStore, StoreError};
use crate::tprintln;

/// Refresh this many seconds before the access token runs out.
const EXPIRY_SLACK_SECS: i64 = 30;

/// Connection details shared by every client of one project.
pub struct RestApi {
    base: Url,
    key: String,
    service_key: Option<String>,
    http: reqwest::Client,
}

impl RestApi {
    pub fn new(base: Url, publishable_key: &str, service_key: Option<String>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().build().map_err(transport)?;
        Ok(Self { base, key: publishable_key.to_string(), service_key, http })
    }

    pub fn has_service_key(&self) -> bool {
        self.service_key.is_some()
    }

    fn url(&self, path: &str) -> Url {
        // Joining an absolute path onto an http(s) base cannot fail.
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.http.request(method, self.url(path)).header("apikey", &self.key).bearer_auth(bearer)
    }
}

fn transport(e: reqwest::Error) -> AuthError {
    AuthError::Transport(e.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

async fn rejection(resp: Response) -> AuthError {
    let status = resp.status();
    let body: GoTrueError = resp.json().await.unwrap_or_default();
    let code = body.error_code.or(body.error).unwrap_or_else(|| status.as_u16().to_string());
    let message = body.msg.or(body.message).or(body.error_description).unwrap_or_else(|| status.to_string());
    AuthError::rejected(code, message)
}

async fn expect_ok(resp: Response) -> Result<Response, AuthError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(rejection(resp).await)
    }
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<String>,
    #[serde(default)]
    user_metadata: Option<Map<String, Value>>,
    #[serde(default)]
    identities: Option<Vec<LinkedMethod>>,
}

impl From<WireUser> for Identity {
    fn from(u: WireUser) -> Self {
        let metadata = u.user_metadata.unwrap_or_default();
        let meta_verified = metadata.get("email_verified").and_then(Value::as_bool).unwrap_or(false);
        Identity {
            id: u.id,
            email: u.email.filter(|e| !e.is_empty()),
            email_verified: meta_verified || u.email_confirmed_at.is_some(),
            identities: u.identities.unwrap_or_default(),
            metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: WireUser,
}

impl WireSession {
    fn into_parts(self) -> (Session, Identity) {
        let expires_at = self.expires_at.or_else(|| self.expires_in.map(|s| Utc::now().timestamp() + s));
        let session = Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            identity_id: self.user.id.clone(),
            expires_at,
        };
        (session, self.user.into())
    }
}

fn pkce_verifier() -> Result<String, AuthError> {
    let mut buf = [0u8; 48];
    getrandom::getrandom(&mut buf).map_err(|e| AuthError::Transport(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// S256 code challenge: unpadded base64url of the verifier's SHA-256.
fn pkce_challenge(verifier: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// One client's connection to the hosted auth service.
pub struct RestAuth {
    api: Arc<RestApi>,
    hub: Arc<SessionHub>,
    // PKCE verifier for the flow this client started last.
    verifier: Mutex<Option<String>>,
}

impl RestAuth {
    pub fn new(api: Arc<RestApi>, hub: Arc<SessionHub>) -> Self {
        Self { api, hub, verifier: Mutex::new(None) }
    }

    /// Start a PKCE flow and return the challenge to send; the verifier stays here.
    fn begin_pkce(&self) -> Result<String, AuthError> {
        let v = pkce_verifier()?;
        let challenge = pkce_challenge(&v);
        *self.verifier.lock() = Some(v);
        Ok(challenge)
    }

    fn bearer(&self) -> String {
        self.hub.current().map(|s| s.access_token).unwrap_or_else(|| self.api.key.clone())
    }

    async fn token_grant(&self, grant: &str, body: Value) -> Result<Session, AuthError> {
        let resp = self
            .api
            .request(Method::POST, "/auth/v1/token", &self.api.key)
            .query(&[("grant_type", grant)])
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let wire: WireSession = expect_ok(resp).await?.json().await.map_err(transport)?;
        let (session, _) = wire.into_parts();
        self.hub.set(session.clone());
        Ok(session)
    }

    async fn refresh(&self, session: &Session) -> Result<Option<Session>, AuthError> {
        let Some(token) = session.refresh_token.as_deref() else {
            self.hub.clear();
            return Ok(None);
        };
        match self.token_grant("refresh_token", json!({ "refresh_token": token })).await {
            Ok(s) => Ok(Some(s)),
            Err(AuthError::Rejected { code, .. }) => {
                debug!(target: "auth", code = %code, "refresh rejected, dropping session");
                self.hub.clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CapabilityProvider for RestAuth {
    async fn sign_up(&self, email: &str, password: &str, name: &str, email_redirect_to: &str) -> Result<SignUpResult, AuthError> {
        let challenge = self.begin_pkce()?;
        let resp = self
            .api
            .request(Method::POST, "/auth/v1/signup", &self.api.key)
            .query(&[("redirect_to", email_redirect_to)])
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "name": name },
                "code_challenge": challenge,
                "code_challenge_method": "s256",
            }))
            .send()
            .await
            .map_err(transport)?;
        let body: Value = expect_ok(resp).await?.json().await.map_err(transport)?;
        // Projects with auto-confirm answer with a session, the rest with the bare user.
        if body.get("access_token").is_some() {
            let wire: WireSession = serde_json::from_value(body).map_err(|e| AuthError::Transport(e.to_string()))?;
            let (session, identity) = wire.into_parts();
            self.hub.set(session.clone());
            return Ok(SignUpResult { identity, session: Some(session) });
        }
        let user: WireUser = serde_json::from_value(body).map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(SignUpResult { identity: user.into(), session: None })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.token_grant("password", json!({ "email": email, "password": password })).await
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<String, AuthError> {
        let challenge = self.begin_pkce()?;
        let mut url = self.api.url("/auth/v1/authorize");
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "s256")
            .append_pair("prompt", "consent");
        Ok(url.to_string())
    }

    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, AuthError> {
        let Some(verifier) = self.verifier.lock().take() else {
            return Err(AuthError::rejected("flow_state_not_found", "No sign-in was started from this browser"));
        };
        tprintln!("rest.exchange code_len={}", code.len());
        self.token_grant("pkce", json!({ "auth_code": code, "code_verifier": verifier })).await
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.hub.current() else { return Ok(None) };
        match session.expires_at {
            Some(at) if at - EXPIRY_SLACK_SECS <= Utc::now().timestamp() => self.refresh(&session).await,
            _ => Ok(Some(session)),
        }
    }

    async fn get_user(&self) -> Result<Option<Identity>, AuthError> {
        let Some(session) = self.get_session().await? else { return Ok(None) };
        let resp = self
            .api
            .request(Method::GET, "/auth/v1/user", &session.access_token)
            .send()
            .await
            .map_err(transport)?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            self.hub.clear();
            return Ok(None);
        }
        let user: WireUser = expect_ok(resp).await?.json().await.map_err(transport)?;
        Ok(Some(user.into()))
    }

    fn subscribe(&self) -> SessionSubscription {
        self.hub.subscribe()
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<(), AuthError> {
        let session = self.hub.current().ok_or(AuthError::NoSession)?;
        let resp = self
            .api
            .request(Method::PUT, "/auth/v1/user", &session.access_token)
            .json(update)
            .send()
            .await
            .map_err(transport)?;
        expect_ok(resp).await?;
        self.hub.notify_user_updated();
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let challenge = self.begin_pkce()?;
        let resp = self
            .api
            .request(Method::POST, "/auth/v1/recover", &self.api.key)
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email, "code_challenge": challenge, "code_challenge_method": "s256" }))
            .send()
            .await
            .map_err(transport)?;
        expect_ok(resp).await.map(|_| ())
    }

    async fn resend_verification_email(&self, email: &str) -> Result<(), AuthError> {
        let resp = self
            .api
            .request(Method::POST, "/auth/v1/resend", &self.bearer())
            .json(&json!({ "type": "signup", "email": email }))
            .send()
            .await
            .map_err(transport)?;
        expect_ok(resp).await.map(|_| ())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.hub.clear() else { return Ok(()) };
        let sent = self
            .api
            .request(Method::POST, "/auth/v1/logout", &session.access_token)
            .send()
            .await;
        // The local session is gone either way.
        match sent {
            Ok(resp) if !resp.status().is_success() => {
                warn!(target: "auth", status = %resp.status(), "remote logout rejected");
            }
            Err(e) => warn!(target: "auth", error = %e, "remote logout failed"),
            Ok(_) => {}
        }
        Ok(())
    }
}

/// Service-role access to identity management.
pub struct RestAdmin {
    api: Arc<RestApi>,
}

impl RestAdmin {
    /// `None` unless a service-role key is configured.
    pub fn new(api: Arc<RestApi>) -> Option<Self> {
        api.has_service_key().then_some(Self { api })
    }
}

#[async_trait]
impl IdentityAdmin for RestAdmin {
    async fn delete_identity(&self, identity_id: &str) -> Result<(), AuthError> {
        let key = self.api.service_key.as_deref().ok_or_else(|| AuthError::Unsupported("identity deletion".into()))?;
        let path = format!("/auth/v1/admin/users/{}", urlencoding::encode(identity_id));
        let resp = self
            .api
            .http
            .delete(self.api.url(&path))
            .header("apikey", key)
            .bearer_auth(key)
            .send()
            .await
            .map_err(transport)?;
        expect_ok(resp).await.map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn store_transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

async fn rows(resp: Response) -> Result<Vec<Profile>, StoreError> {
    let status = resp.status();
    if !status.is_success() {
        let body: PostgrestError = resp.json().await.unwrap_or_default();
        return Err(StoreError::database(body.code.as_deref(), body.message.unwrap_or_else(|| status.to_string())));
    }
    resp.json().await.map_err(store_transport)
}

fn eq(v: &str) -> String {
    format!("eq.{v}")
}

fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|i| format!("\"{}\"", i.replace('"', "\\\""))).collect();
    format!("in.({})", quoted.join(","))
}

/// `profiles` relation through PostgREST, acting as the client's user when
/// signed in so row-level security applies.
pub struct RestProfileStore {
    api: Arc<RestApi>,
    hub: Option<Arc<SessionHub>>,
}

impl RestProfileStore {
    pub fn new(api: Arc<RestApi>, hub: Option<Arc<SessionHub>>) -> Self {
        Self { api, hub }
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let bearer = self
            .hub
            .as_ref()
            .and_then(|h| h.current())
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.api.key.clone());
        self.api.request(method, "/rest/v1/profiles", &bearer)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Vec<Profile>, StoreError> {
        rows(req.send().await.map_err(store_transport)?).await
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn select_by_id(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        let req = self.request(Method::GET).query(&[("select", "*".to_string()), ("id", eq(id))]);
        Ok(self.send(req).await?.into_iter().next())
    }

    async fn upsert(&self, row: &ProfileUpsert) -> Result<Profile, StoreError> {
        let req = self
            .request(Method::POST)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(row);
        self.send(req).await?.into_iter().next().ok_or_else(|| StoreError::NotFound(row.id.clone()))
    }

    async fn update_by_id(&self, id: &str, patch: &ProfilePatch) -> Result<Profile, StoreError> {
        let req = self
            .request(Method::PATCH)
            .query(&[("id", eq(id))])
            .header("Prefer", "return=representation")
            .json(patch);
        self.send(req).await?.into_iter().next().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let req = self.request(Method::DELETE).query(&[("id", eq(id))]).header("Prefer", "return=representation");
        Ok(!self.send(req).await?.is_empty())
    }

    async fn select_by_role(&self, role: Role) -> Result<Vec<Profile>, StoreError> {
        let req = self.request(Method::GET).query(&[
            ("select", "*".to_string()),
            ("role", eq(role.as_str())),
            ("order", "created_at.desc".to_string()),
        ]);
        self.send(req).await
    }

    async fn select_many_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET).query(&[("select", "*".to_string()), ("id", in_list(ids))]);
        self.send(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> Arc<RestApi> {
        Arc::new(RestApi::new(Url::parse("https://proj.example.co").unwrap(), "anon-key", None).unwrap())
    }

    #[test]
    fn wire_user_maps_verification_and_methods() {
        let u: WireUser = serde_json::from_value(json!({
            "id": "abc",
            "email": "a@x.io",
            "email_confirmed_at": null,
            "user_metadata": { "email_verified": true, "full_name": "A X" },
            "identities": [{ "provider": "google", "identity_id": "g1" }]
        }))
        .unwrap();
        let ident: Identity = u.into();
        assert!(ident.email_verified);
        assert!(!ident.has_password_identity());
        assert_eq!(ident.metadata_name(), Some("A X"));

        let bare: Identity = serde_json::from_value::<WireUser>(json!({ "id": "b", "user_metadata": null })).unwrap().into();
        assert!(!bare.email_verified);
        assert!(bare.metadata.is_empty());
    }

    #[test]
    fn session_expiry_from_expires_in() {
        let wire: WireSession = serde_json::from_value(json!({
            "access_token": "t", "expires_in": 3600, "user": { "id": "u" }
        }))
        .unwrap();
        let (s, _) = wire.into_parts();
        assert_eq!(s.identity_id, "u");
        assert!(s.expires_at.unwrap() > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn authorize_url_carries_pkce_and_redirect() {
        let auth = RestAuth::new(api(), Arc::new(SessionHub::new()));
        let url = auth.sign_in_with_oauth(OAuthProvider::Google, "https://d.test/auth/callback?next=%2F").await.unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/auth/v1/authorize");
        let q: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(q["provider"], "google");
        assert_eq!(q["redirect_to"], "https://d.test/auth/callback?next=%2F");
        assert_eq!(q["code_challenge_method"], "s256");
        let verifier = auth.verifier.lock().clone().unwrap();
        assert_ne!(q["code_challenge"], verifier);
        assert_eq!(q["code_challenge"], pkce_challenge(&verifier));
    }

    #[test]
    fn s256_challenge_matches_rfc_7636_vector() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-1mB92K27uhbUJU1p1r7W-gFrKW9-cM"),
            "E9Melhoofx9iCVoa2eChCb2tUoNfFgNh5VTd3xMLb8M"
        );
    }

    #[tokio::test]
    async fn exchange_without_started_flow_is_rejected_locally() {
        let auth = RestAuth::new(api(), Arc::new(SessionHub::new()));
        let err = auth.exchange_code_for_session("c").await.unwrap_err();
        assert_eq!(err.code(), "flow_state_not_found");
    }

    #[test]
    fn in_list_quotes_ids() {
        assert_eq!(in_list(&["a".into(), "b-2".into()]), "in.(\"a\",\"b-2\")");
        assert!(RestAdmin::new(api()).is_none());
    }
}
