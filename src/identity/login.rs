//! Sign-in, sign-up and password recovery as driven from the login screens.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bootstrap::ensure_profile;
use super::model::{ProfilePatch, UserUpdate};
use super::password::{PasswordRequirements, MIN_PASSWORD_LEN};
use super::provider::{AuthError, CapabilityProvider, OAuthProvider};
use super::resolver::{resolve_redirect, RedirectTarget};
use super::store::ProfileStore;

/// Failure shown inline on a login-family form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
    /// Caught before the provider was called.
    #[error("{0}")]
    Invalid(String),
    /// The provider refused; message is already user facing.
    #[error("{0}")]
    Rejected(String),
}

impl LoginFailure {
    pub fn message(&self) -> &str {
        match self {
            LoginFailure::Invalid(m) | LoginFailure::Rejected(m) => m,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub accept_terms: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Provider wants the address confirmed before a session is issued.
    VerifyEmail { email: String },
    SignedIn(RedirectTarget),
}

/// Only a same-origin relative path is carried through the OAuth round trip.
fn oauth_next(redirected_from: Option<&str>) -> &str {
    redirected_from.filter(|p| p.starts_with('/')).unwrap_or("/")
}

pub struct LoginFlow {
    provider: Arc<dyn CapabilityProvider>,
    store: Arc<dyn ProfileStore>,
    site_origin: String,
}

impl LoginFlow {
    pub fn new(provider: Arc<dyn CapabilityProvider>, store: Arc<dyn ProfileStore>, site_origin: &str) -> Self {
        Self { provider, store, site_origin: site_origin.trim_end_matches('/').to_string() }
    }

    pub fn callback_url(&self, next: &str) -> String {
        format!("{}/auth/callback?next={}", self.site_origin, urlencoding::encode(next))
    }

    pub async fn sign_in(&self, email: &str, password: &str, redirected_from: Option<&str>) -> Result<RedirectTarget, LoginFailure> {
        let session = self
            .provider
            .sign_in_with_password(email.trim(), password)
            .await
            .map_err(|e| {
                info!(target: "auth", code = e.code(), "password sign-in rejected");
                LoginFailure::Rejected(e.friendly_message())
            })?;
        let id = session.identity_id.clone();

        match self.provider.get_user().await {
            Ok(Some(identity)) => {
                if let Err(e) = ensure_profile(self.store.as_ref(), &identity).await {
                    warn!(target: "auth", identity = %id, error = %e, "profile bootstrap failed after sign-in");
                }
            }
            Ok(None) => warn!(target: "auth", identity = %id, "signed in but no user returned"),
            Err(e) => warn!(target: "auth", identity = %id, error = %e, "could not load user after sign-in"),
        }
        if let Err(e) = self.store.update_by_id(&id, &ProfilePatch::touch(Utc::now())).await {
            warn!(target: "auth", identity = %id, error = %e, "failed to update profile timestamp");
        }

        let target = resolve_redirect(self.store.as_ref(), redirected_from, &id).await;
        info!(target: "auth", identity = %id, to = target.as_path(), "password sign-in complete");
        Ok(target)
    }

    /// Page-load short circuit: a visitor who already holds a session goes
    /// straight to their destination.
    pub async fn resume(&self, redirected_from: Option<&str>) -> Option<RedirectTarget> {
        let session = match self.provider.get_session().await {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                warn!(target: "auth", error = %e, "session check failed on login page");
                return None;
            }
        };
        debug!(target: "auth", identity = %session.identity_id, "existing session, skipping login form");
        Some(resolve_redirect(self.store.as_ref(), redirected_from, &session.identity_id).await)
    }

    /// Returns the provider URL to send the browser to.
    pub async fn oauth_start(&self, provider: OAuthProvider, redirected_from: Option<&str>) -> Result<String, LoginFailure> {
        let redirect_to = self.callback_url(oauth_next(redirected_from));
        self.provider.sign_in_with_oauth(provider, &redirect_to).await.map_err(|e| {
            warn!(target: "auth", %provider, error = %e, "oauth start failed");
            LoginFailure::Rejected(match e {
                AuthError::Rejected { message, .. } if !message.is_empty() => message,
                _ => "Unable to start OAuth sign-in.".into(),
            })
        })
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SignUpOutcome, LoginFailure> {
        if !form.accept_terms {
            return Err(LoginFailure::Invalid("Please agree to the Terms of Service and Privacy Policy.".into()));
        }
        if !PasswordRequirements::evaluate(&form.password).all_met() {
            return Err(LoginFailure::Invalid("Please meet all password requirements before continuing.".into()));
        }
        if form.password != form.confirm_password {
            return Err(LoginFailure::Invalid("Passwords do not match. Please re-enter.".into()));
        }
        let email = form.email.trim();
        let result = self
            .provider
            .sign_up(email, &form.password, form.name.trim(), &self.callback_url("/login"))
            .await
            .map_err(|e| {
                let lower = e.to_string().to_lowercase();
                if lower.contains("already registered") || lower.contains("already exists") || lower.contains("already_exists") {
                    LoginFailure::Rejected(format!("The email {email} is already associated with an account."))
                } else {
                    LoginFailure::Rejected(match e.message() {
                        m if m.is_empty() => "Please try again.".into(),
                        m => m,
                    })
                }
            })?;

        if result.session.is_none() {
            info!(target: "auth", identity = %result.identity.id, "sign-up pending email verification");
            return Ok(SignUpOutcome::VerifyEmail { email: email.to_string() });
        }
        if let Err(e) = ensure_profile(self.store.as_ref(), &result.identity).await {
            warn!(target: "auth", identity = %result.identity.id, error = %e, "profile bootstrap failed after sign-up");
        }
        Ok(SignUpOutcome::SignedIn(RedirectTarget::Home))
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), LoginFailure> {
        let email = email.trim();
        if email.is_empty() {
            return Err(LoginFailure::Invalid("Email is required.".into()));
        }
        let redirect_to = format!("{}/reset-password", self.site_origin);
        self.provider
            .reset_password_for_email(email, &redirect_to)
            .await
            .map_err(|e| LoginFailure::Rejected(e.message()))
    }

    /// Set a new password for the recovering session.
    pub async fn complete_password_reset(&self, password: &str) -> Result<(), LoginFailure> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LoginFailure::Invalid("Password must be at least 8 characters.".into()));
        }
        let update = UserUpdate { password: Some(password.to_string()) };
        self.provider.update_user(&update).await.map_err(|e| LoginFailure::Rejected(e.message()))?;
        info!(target: "auth", "password reset completed");
        Ok(())
    }

    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(target: "auth", error = %e, "sign-out failed");
        }
    }
}
