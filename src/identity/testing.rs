//! Test doubles for the provider and store seams.
//!
//! `ScriptedProvider` plays back programmed outcomes and counts every call;
//! `CountingStore` wraps any [`ProfileStore`] and counts (or fails) operations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::hub::{SessionHub, SessionSubscription};
use super::model::{Identity, Profile, ProfilePatch, ProfileUpsert, Session, UserUpdate};
use super::provider::{AuthError, CapabilityProvider, OAuthProvider, SignUpResult};
use super::role::Role;
use super::store::{ProfileStore, StoreError};

pub fn session_for(identity_id: &str) -> Session {
    Session {
        access_token: format!("access-{identity_id}"),
        refresh_token: None,
        identity_id: identity_id.to_string(),
        expires_at: None,
    }
}

#[derive(Debug, Clone)]
pub enum ExchangeScript {
    Succeed(Session),
    Fail(AuthError),
    /// Exchange reports failure but the session lands anyway.
    FailButStore(AuthError, Session),
    Panic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCalls {
    pub sign_up: usize,
    pub sign_in: usize,
    pub oauth: usize,
    pub exchange: usize,
    pub get_session: usize,
    pub get_user: usize,
    pub update_user: usize,
    pub reset: usize,
    pub resend: usize,
    pub sign_out: usize,
}

#[derive(Default)]
struct Counters {
    sign_up: AtomicUsize,
    sign_in: AtomicUsize,
    oauth: AtomicUsize,
    exchange: AtomicUsize,
    get_session: AtomicUsize,
    get_user: AtomicUsize,
    update_user: AtomicUsize,
    reset: AtomicUsize,
    resend: AtomicUsize,
    sign_out: AtomicUsize,
}

fn bump(c: &AtomicUsize) -> usize {
    c.fetch_add(1, Ordering::SeqCst)
}

pub struct ScriptedProvider {
    hub: Arc<SessionHub>,
    identity: Mutex<Option<Identity>>,
    exchange: Mutex<ExchangeScript>,
    sign_in: Mutex<Result<Session, AuthError>>,
    session_failures: AtomicUsize,
    session_failures_after: AtomicUsize,
    update_error: Mutex<Option<AuthError>>,
    panic_on_session: AtomicBool,
    calls: Counters,
}

impl ScriptedProvider {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self {
            hub,
            identity: Mutex::new(None),
            exchange: Mutex::new(ExchangeScript::Fail(AuthError::rejected("invalid_grant", "no script"))),
            sign_in: Mutex::new(Err(AuthError::rejected("invalid_credentials", "Invalid login credentials"))),
            session_failures: AtomicUsize::new(0),
            session_failures_after: AtomicUsize::new(0),
            update_error: Mutex::new(None),
            panic_on_session: AtomicBool::new(false),
            calls: Counters::default(),
        }
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn with_identity(self, identity: Identity) -> Self {
        *self.identity.lock() = Some(identity);
        self
    }

    pub fn on_exchange(self, script: ExchangeScript) -> Self {
        *self.exchange.lock() = script;
        self
    }

    pub fn on_sign_in(self, outcome: Result<Session, AuthError>) -> Self {
        *self.sign_in.lock() = outcome;
        self
    }

    pub fn on_update_user(self, err: AuthError) -> Self {
        *self.update_error.lock() = Some(err);
        self
    }

    /// The next `n` session checks fail with a transport error.
    pub fn fail_session_checks(self, n: usize) -> Self {
        self.session_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Let the first `ok` session checks through, then fail the next `n`.
    pub fn fail_session_checks_after(self, ok: usize, n: usize) -> Self {
        self.session_failures_after.store(ok, Ordering::SeqCst);
        self.fail_session_checks(n)
    }

    /// The next session check panics.
    pub fn panic_on_session_check(self) -> Self {
        self.panic_on_session.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> ProviderCalls {
        let c = &self.calls;
        let get = |a: &AtomicUsize| a.load(Ordering::SeqCst);
        ProviderCalls {
            sign_up: get(&c.sign_up),
            sign_in: get(&c.sign_in),
            oauth: get(&c.oauth),
            exchange: get(&c.exchange),
            get_session: get(&c.get_session),
            get_user: get(&c.get_user),
            update_user: get(&c.update_user),
            reset: get(&c.reset),
            resend: get(&c.resend),
            sign_out: get(&c.sign_out),
        }
    }
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    async fn sign_up(&self, email: &str, _password: &str, _name: &str, _email_redirect_to: &str) -> Result<SignUpResult, AuthError> {
        bump(&self.calls.sign_up);
        let identity = self.identity.lock().clone().unwrap_or_else(|| Identity {
            id: "scripted".into(),
            email: Some(email.to_string()),
            ..Default::default()
        });
        Ok(SignUpResult { identity, session: None })
    }

    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Session, AuthError> {
        bump(&self.calls.sign_in);
        let outcome = self.sign_in.lock().clone();
        if let Ok(s) = &outcome {
            self.hub.set(s.clone());
        }
        outcome
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<String, AuthError> {
        bump(&self.calls.oauth);
        Ok(format!(
            "https://auth.test/authorize?provider={}&redirect_to={}",
            provider,
            urlencoding::encode(redirect_to)
        ))
    }

    async fn exchange_code_for_session(&self, _code: &str) -> Result<Session, AuthError> {
        bump(&self.calls.exchange);
        let script = self.exchange.lock().clone();
        match script {
            ExchangeScript::Succeed(s) => {
                self.hub.set(s.clone());
                Ok(s)
            }
            ExchangeScript::Fail(e) => Err(e),
            ExchangeScript::FailButStore(e, s) => {
                self.hub.set(s);
                Err(e)
            }
            ExchangeScript::Panic => panic!("scripted exchange panic"),
        }
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        bump(&self.calls.get_session);
        if self.panic_on_session.swap(false, Ordering::SeqCst) {
            panic!("scripted session panic");
        }
        let past_ok = self.calls.get_session.load(Ordering::SeqCst) > self.session_failures_after.load(Ordering::SeqCst);
        let failing = past_ok
            && self
                .session_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(AuthError::Transport("scripted outage".into()));
        }
        Ok(self.hub.current())
    }

    async fn get_user(&self) -> Result<Option<Identity>, AuthError> {
        bump(&self.calls.get_user);
        if self.hub.current().is_none() {
            return Ok(None);
        }
        Ok(self.identity.lock().clone())
    }

    fn subscribe(&self) -> SessionSubscription {
        self.hub.subscribe()
    }

    async fn update_user(&self, _update: &UserUpdate) -> Result<(), AuthError> {
        bump(&self.calls.update_user);
        if let Some(e) = self.update_error.lock().clone() {
            return Err(e);
        }
        if self.hub.current().is_none() {
            return Err(AuthError::NoSession);
        }
        self.hub.notify_user_updated();
        Ok(())
    }

    async fn reset_password_for_email(&self, _email: &str, _redirect_to: &str) -> Result<(), AuthError> {
        bump(&self.calls.reset);
        Ok(())
    }

    async fn resend_verification_email(&self, _email: &str) -> Result<(), AuthError> {
        bump(&self.calls.resend);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        bump(&self.calls.sign_out);
        self.hub.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub select_by_id: usize,
    pub upsert: usize,
    pub update_by_id: usize,
    pub delete_by_id: usize,
    pub select_by_role: usize,
    pub select_many_by_ids: usize,
}

pub struct CountingStore<S = super::MemoryProfileStore> {
    inner: S,
    counts: Mutex<StoreCounts>,
    read_error: Mutex<Option<StoreError>>,
    write_error: Mutex<Option<StoreError>>,
}

impl<S: ProfileStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, counts: Mutex::new(StoreCounts::default()), read_error: Mutex::new(None), write_error: Mutex::new(None) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn counts(&self) -> StoreCounts {
        *self.counts.lock()
    }

    pub fn reset_counts(&self) {
        *self.counts.lock() = StoreCounts::default();
    }

    pub fn fail_reads(&self, message: &str) {
        *self.read_error.lock() = Some(StoreError::Transport(message.to_string()));
    }

    pub fn fail_writes(&self, err: StoreError) {
        *self.write_error.lock() = Some(err);
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        self.read_error.lock().clone().map_or(Ok(()), Err)
    }

    fn write_guard(&self) -> Result<(), StoreError> {
        self.write_error.lock().clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl<S: ProfileStore> ProfileStore for CountingStore<S> {
    async fn select_by_id(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        self.counts.lock().select_by_id += 1;
        self.read_guard()?;
        self.inner.select_by_id(id).await
    }

    async fn upsert(&self, row: &ProfileUpsert) -> Result<Profile, StoreError> {
        self.counts.lock().upsert += 1;
        self.write_guard()?;
        self.inner.upsert(row).await
    }

    async fn update_by_id(&self, id: &str, patch: &ProfilePatch) -> Result<Profile, StoreError> {
        self.counts.lock().update_by_id += 1;
        self.write_guard()?;
        self.inner.update_by_id(id, patch).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.counts.lock().delete_by_id += 1;
        self.write_guard()?;
        self.inner.delete_by_id(id).await
    }

    async fn select_by_role(&self, role: Role) -> Result<Vec<Profile>, StoreError> {
        self.counts.lock().select_by_role += 1;
        self.read_guard()?;
        self.inner.select_by_role(role).await
    }

    async fn select_many_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>, StoreError> {
        self.counts.lock().select_many_by_ids += 1;
        self.read_guard()?;
        self.inner.select_many_by_ids(ids).await
    }
}
