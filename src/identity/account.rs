//! Account screen: profile editing, password change, verification resend.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::bootstrap::{derive_display_name, ensure_profile};
use super::model::{Identity, ProfileUpsert, UserUpdate};
use super::password::PasswordRequirements;
use super::provider::{AuthError, CapabilityProvider};
use super::role::Role;
use super::store::{ProfileStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountError {
    /// No user; the screen sends the visitor to the login page.
    #[error("not signed in")]
    SignedOut,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    /// Toast text for the account screen.
    pub fn friendly_message(&self) -> String {
        match self {
            AccountError::SignedOut => "Please sign in again.".into(),
            AccountError::Invalid(m) => m.clone(),
            AccountError::Auth(e) => e.message(),
            AccountError::Store(e) => e.friendly_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub has_password_identity: bool,
    pub name: String,
    pub bio: String,
    pub role: Role,
}

pub struct AccountService {
    provider: Arc<dyn CapabilityProvider>,
    store: Arc<dyn ProfileStore>,
}

impl AccountService {
    pub fn new(provider: Arc<dyn CapabilityProvider>, store: Arc<dyn ProfileStore>) -> Self {
        Self { provider, store }
    }

    async fn user(&self) -> Result<Identity, AccountError> {
        self.provider.get_user().await?.ok_or(AccountError::SignedOut)
    }

    /// Load the screen, creating or repairing the profile row on the way.
    pub async fn load(&self) -> Result<AccountView, AccountError> {
        let identity = self.user().await?;
        let profile = match ensure_profile(self.store.as_ref(), &identity).await {
            Ok(outcome) => Some(outcome.into_profile()),
            Err(e) => {
                warn!(target: "auth", identity = %identity.id, error = %e, "account bootstrap failed");
                None
            }
        };
        Ok(AccountView {
            email: identity.email.clone().unwrap_or_default(),
            email_verified: identity.email_verified,
            has_password_identity: identity.has_password_identity(),
            name: derive_display_name(profile.as_ref(), &identity),
            bio: profile.as_ref().and_then(|p| p.bio.clone()).unwrap_or_default(),
            role: profile.as_ref().map(|p| p.role()).unwrap_or_default(),
            id: identity.id,
        })
    }

    pub async fn save_profile(&self, name: &str, bio: &str) -> Result<&'static str, AccountError> {
        let identity = self.user().await?;
        let row = ProfileUpsert {
            id: identity.id.clone(),
            email: identity.email.clone(),
            name: Some(name.trim().to_string()),
            bio: Some(bio.trim().to_string()),
        };
        self.store.upsert(&row).await.inspect_err(|e| {
            warn!(target: "auth", identity = %identity.id, code = e.code(), error = %e, "profile save failed");
        })?;
        Ok("Profile saved")
    }

    pub async fn change_password(&self, new_password: &str, confirm: &str) -> Result<&'static str, AccountError> {
        if !PasswordRequirements::evaluate(new_password).all_met() || new_password != confirm {
            return Err(AccountError::Invalid(
                "Please meet all password requirements and confirm the password.".into(),
            ));
        }
        self.provider.update_user(&UserUpdate { password: Some(new_password.to_string()) }).await?;
        info!(target: "auth", "password changed from account screen");
        Ok("Password updated")
    }

    pub async fn resend_verification(&self) -> Result<&'static str, AccountError> {
        let identity = self.user().await?;
        let email = identity.email.as_deref().filter(|e| !e.is_empty()).ok_or_else(|| {
            AccountError::Invalid("This account has no email address.".into())
        })?;
        self.provider.resend_verification_email(email).await?;
        Ok("Verification email sent")
    }

    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(target: "auth", error = %e, "sign-out failed");
        }
    }
}
