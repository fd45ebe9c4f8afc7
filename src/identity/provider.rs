use std::fmt::{Display, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

use super::hub::SessionSubscription;
use super::model::{Identity, Session, UserUpdate};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Provider rejected the request (bad credentials, unconfirmed email, used code, ...).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
    #[error("no active session")]
    NoSession,
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("provider unavailable: {0}")]
    Transport(String),
}

impl AuthError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        AuthError::Rejected { code: code.into(), message: message.into() }
    }

    pub fn code(&self) -> &str {
        match self {
            AuthError::Rejected { code, .. } => code,
            AuthError::NoSession => "no_session",
            AuthError::Unsupported(_) => "unsupported",
            AuthError::Transport(_) => "transport",
        }
    }

    /// Provider's own wording, without the code prefix.
    pub fn message(&self) -> String {
        match self {
            AuthError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Message suitable for the sign-in form.
    pub fn friendly_message(&self) -> String {
        let raw = match self {
            AuthError::Rejected { code, message } => format!("{code} {message}"),
            other => other.to_string(),
        };
        let lower = raw.to_lowercase();
        if lower.contains("confirm") || lower.contains("email_not_confirmed") {
            return "Please verify your email.".into();
        }
        if lower.contains("invalid") || lower.contains("credentials") {
            return "Invalid email or password.".into();
        }
        match self {
            AuthError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            _ => "Login failed.".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            other => Err(AuthError::Unsupported(format!("oauth provider '{other}'"))),
        }
    }
}

impl Display for OAuthProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a sign-up: the new identity, plus a session when the provider does
/// not require email confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResult {
    pub identity: Identity,
    pub session: Option<Session>,
}

/// Hosted authentication service as seen by one client. Implementations keep the
/// client's session in a [`super::SessionHub`]; `get_session` reads it and the
/// sign-in / exchange / sign-out calls update it.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// `name` lands in the identity metadata; `email_redirect_to` is where the
    /// confirmation link points.
    async fn sign_up(&self, email: &str, password: &str, name: &str, email_redirect_to: &str) -> Result<SignUpResult, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Returns the provider URL the browser must be sent to.
    async fn sign_in_with_oauth(&self, provider: OAuthProvider, redirect_to: &str) -> Result<String, AuthError>;

    /// Authorization codes are single use; callers must not resubmit one.
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, AuthError>;

    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    async fn get_user(&self) -> Result<Option<Identity>, AuthError>;

    fn subscribe(&self) -> SessionSubscription;

    async fn update_user(&self, update: &UserUpdate) -> Result<(), AuthError>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), AuthError>;

    async fn resend_verification_email(&self, email: &str) -> Result<(), AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Privileged identity management (service role only).
#[async_trait]
pub trait IdentityAdmin: Send + Sync {
    async fn delete_identity(&self, identity_id: &str) -> Result<(), AuthError>;
}
