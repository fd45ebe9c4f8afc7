use async_trait::async_trait;
use thiserror::Error;

use super::model::{Profile, ProfilePatch, ProfileUpsert};
use super::role::Role;

/// Postgres code for a missing relation.
pub const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("profile {0} not found")]
    NotFound(String),
    /// Error reported by the database, with its SQLSTATE-style code when known.
    #[error("{message}")]
    Database { code: Option<String>, message: String },
    #[error("profile store unavailable: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn database(code: Option<&str>, message: impl Into<String>) -> Self {
        StoreError::Database { code: code.map(str::to_string), message: message.into() }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Message shown to the user on the account screen.
    pub fn friendly_message(&self) -> String {
        if self.code() == Some(UNDEFINED_TABLE) {
            return "Profiles table missing. Create `public.profiles` before saving profiles.".into();
        }
        self.to_string()
    }
}

/// Application-owned relation of profiles keyed by identity id. Single-row
/// atomicity is the store's; callers take no locks.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn select_by_id(&self, id: &str) -> Result<Option<Profile>, StoreError>;

    async fn upsert(&self, row: &ProfileUpsert) -> Result<Profile, StoreError>;

    /// Fails with `NotFound` when no row matches.
    async fn update_by_id(&self, id: &str, patch: &ProfilePatch) -> Result<Profile, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    async fn select_by_role(&self, role: Role) -> Result<Vec<Profile>, StoreError>;

    async fn select_many_by_ids(&self, ids: &[String]) -> Result<Vec<Profile>, StoreError>;
}
