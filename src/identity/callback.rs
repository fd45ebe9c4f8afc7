//! OAuth / email-link callback handling.
//!
//! A callback arrives with `?code=...&next=/path` on success, or with an
//! `#error=...&error_description=...` fragment when the provider refused.
//! [`CallbackFlow::run`] turns that into exactly one [`Navigation`]:
//!
//! ```text
//! INIT ──session present──────────────────────────────► RESOLVE
//!   │──error param─────────────────────────────────────► FAILED (notice, delayed)
//!   │──no code─────────────────────────────────────────► FAILED (immediate)
//!   └──code──► EXCHANGING ──ok─────────────────────────► RESOLVE
//!                  └──err──► RETRY_WAIT ──session──────► RESOLVE
//!                                └──still none─────────► FAILED
//! ```
//!
//! The exchange is never retried (codes are single use); the retry is one
//! session re-check after a short pause. Errors and panics anywhere fall back
//! to a last session check before giving up.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::latch::OnceLatch;
use super::model::Session;
use super::provider::{AuthError, CapabilityProvider};
use super::resolver::resolve_redirect;
use super::store::ProfileStore;

pub const LOGIN_PATH: &str = "/login";

const GENERIC_VERIFY_FAILURE: &str = "Something went wrong while verifying. Redirecting to login…";
const EXCHANGE_FAILURE: &str = "We couldn't complete sign-in. Redirecting to login…";
const VERIFIED: &str = "Verification complete. Redirecting…";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub next: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid callback url: {0}")]
pub struct CallbackParseError(String);

fn non_empty(v: String) -> Option<String> {
    if v.is_empty() { None } else { Some(v) }
}

fn parse_relative(raw: &str) -> Result<Url, CallbackParseError> {
    // Joining onto a throwaway base accepts both absolute URLs and bare paths.
    Url::parse("http://callback.local/")
        .and_then(|base| base.join(raw))
        .map_err(|e| CallbackParseError(e.to_string()))
}

impl CallbackParams {
    /// Parse an absolute callback URL, or a path with query and fragment.
    pub fn from_url(raw: &str) -> Result<Self, CallbackParseError> {
        let url = parse_relative(raw)?;
        let mut out = CallbackParams::default();
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "code" => out.code = non_empty(v.into_owned()),
                "next" => out.next = non_empty(v.into_owned()),
                "error" => out.error = non_empty(v.into_owned()),
                "error_description" => out.error_description = non_empty(v.into_owned()),
                _ => {}
            }
        }
        // Fragment errors win over query errors; the provider reports implicit-flow
        // failures there and browsers never send fragments to the server.
        if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
            let frag = parse_relative(&format!("/?{fragment}"))?;
            for (k, v) in frag.query_pairs() {
                match k.as_ref() {
                    "error" => out.error = non_empty(v.into_owned()),
                    "error_description" => out.error_description = non_empty(v.into_owned()),
                    _ => {}
                }
            }
        }
        Ok(out)
    }

    pub fn from_parts(query: Option<&str>, fragment: Option<&str>) -> Result<Self, CallbackParseError> {
        let mut raw = String::from("/auth/callback");
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            raw.push('?');
            raw.push_str(q);
        }
        if let Some(f) = fragment.filter(|f| !f.is_empty()) {
            raw.push('#');
            raw.push_str(f);
        }
        Self::from_url(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    Init,
    Exchanging,
    RetryWait,
    Resolve,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub to: String,
    /// How long the notice stays up before navigating.
    pub after: Duration,
    pub notice: Option<String>,
    /// Terminal state that produced this navigation.
    pub state: CallbackState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Navigate(Navigation),
    /// Another invocation already owns this callback.
    AlreadyHandled,
}

#[derive(Debug, Clone, Copy)]
pub struct CallbackTiming {
    pub retry_delay: Duration,
    pub notice_delay: Duration,
}

impl Default for CallbackTiming {
    fn default() -> Self {
        Self { retry_delay: Duration::from_millis(400), notice_delay: Duration::from_millis(2500) }
    }
}

pub struct CallbackFlow {
    provider: Arc<dyn CapabilityProvider>,
    store: Arc<dyn ProfileStore>,
    latch: Arc<OnceLatch>,
    timing: CallbackTiming,
}

impl CallbackFlow {
    pub fn new(provider: Arc<dyn CapabilityProvider>, store: Arc<dyn ProfileStore>, latch: Arc<OnceLatch>) -> Self {
        Self { provider, store, latch, timing: CallbackTiming::default() }
    }

    pub fn with_timing(mut self, timing: CallbackTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run the callback once. Later invocations sharing the latch return
    /// `AlreadyHandled` without touching the provider.
    pub async fn run(&self, params: &CallbackParams) -> CallbackOutcome {
        let Some(guard) = self.latch.try_begin() else {
            debug!(target: "callback", "callback already handled, ignoring re-entry");
            return CallbackOutcome::AlreadyHandled;
        };
        let rechecked = AtomicBool::new(false);
        let nav = match AssertUnwindSafe(self.drive(params, &rechecked)).catch_unwind().await {
            Ok(Ok(nav)) => nav,
            Ok(Err(e)) => {
                warn!(target: "callback", error = %e, "callback flow failed, checking session once more");
                self.fallback(params, &rechecked).await
            }
            Err(_) => {
                error!(target: "callback", "callback flow panicked, checking session once more");
                self.fallback(params, &rechecked).await
            }
        };
        guard.finish();
        info!(target: "callback", to = %nav.to, state = ?nav.state, "callback resolved");
        CallbackOutcome::Navigate(nav)
    }

    /// `rechecked` is set once the single post-failure session check has been spent.
    async fn drive(&self, params: &CallbackParams, rechecked: &AtomicBool) -> Result<Navigation, AuthError> {
        debug!(target: "callback", state = ?CallbackState::Init, has_code = params.code.is_some(), "callback started");
        if let Some(session) = self.provider.get_session().await? {
            debug!(target: "callback", identity = %session.identity_id, "session already present, skipping exchange");
            return Ok(self.resolve(params, &session).await);
        }
        if let Some(err) = params.error.as_deref() {
            info!(target: "callback", error = err, "provider reported callback error");
            return Ok(self.failed_with(params.error_description.as_deref().map(|d| format!("Oops: {d}"))));
        }
        let Some(code) = params.code.as_deref() else {
            return Ok(Navigation { to: LOGIN_PATH.into(), after: Duration::ZERO, notice: None, state: CallbackState::Failed });
        };

        debug!(target: "callback", state = ?CallbackState::Exchanging, "exchanging authorization code");
        match self.provider.exchange_code_for_session(code).await {
            Ok(session) => Ok(self.resolve(params, &session).await),
            Err(e) => {
                warn!(target: "callback", error = %e, state = ?CallbackState::RetryWait, "code exchange rejected");
                tokio::time::sleep(self.timing.retry_delay).await;
                rechecked.store(true, Ordering::SeqCst);
                match self.provider.get_session().await {
                    Ok(Some(session)) => Ok(self.resolve(params, &session).await),
                    Ok(None) => Ok(self.failed_with(Some(EXCHANGE_FAILURE.into()))),
                    Err(e) => {
                        warn!(target: "callback", error = %e, "session re-check failed");
                        Ok(self.failed_with(Some(EXCHANGE_FAILURE.into())))
                    }
                }
            }
        }
    }

    async fn fallback(&self, params: &CallbackParams, rechecked: &AtomicBool) -> Navigation {
        if rechecked.load(Ordering::SeqCst) {
            return self.failed_with(Some(EXCHANGE_FAILURE.into()));
        }
        let last = AssertUnwindSafe(async {
            match self.provider.get_session().await {
                Ok(Some(session)) => Some(self.resolve(params, &session).await),
                _ => None,
            }
        })
        .catch_unwind()
        .await;
        match last {
            Ok(Some(nav)) => nav,
            _ => self.failed_with(Some(EXCHANGE_FAILURE.into())),
        }
    }

    async fn resolve(&self, params: &CallbackParams, session: &Session) -> Navigation {
        // Being sent back to the login page while holding a session would loop.
        let next = match params.next.as_deref() {
            Some(LOGIN_PATH) | None => "/",
            Some(n) => n,
        };
        let target = resolve_redirect(self.store.as_ref(), Some(next), &session.identity_id).await;
        Navigation {
            to: target.as_path().to_string(),
            after: self.timing.notice_delay,
            notice: Some(VERIFIED.into()),
            state: CallbackState::Resolve,
        }
    }

    fn failed_with(&self, notice: Option<String>) -> Navigation {
        Navigation {
            to: LOGIN_PATH.into(),
            after: self.timing.notice_delay,
            notice: Some(notice.unwrap_or_else(|| GENERIC_VERIFY_FAILURE.into())),
            state: CallbackState::Failed,
        }
    }
}
