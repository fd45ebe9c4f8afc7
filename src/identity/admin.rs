//! User management behind the Role Gate.
//!
//! Two deletes exist on purpose and are named apart: [`AdminUsers::delete_profile`]
//! removes only the application row, so the identity can still sign in and
//! will get a fresh row from Profile Bootstrap. [`AdminUsers::delete_account`]
//! also removes the identity through [`IdentityAdmin`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::model::Profile;
use super::provider::{AuthError, IdentityAdmin};
use super::role::Role;
use super::store::{ProfileStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("user {0} not found")]
    NotFound(String),
    #[error("account deletion needs the service-role key")]
    NoAdminCapability,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// One line of the users table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub joined: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&Profile> for UserRow {
    fn from(p: &Profile) -> Self {
        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        UserRow {
            id: p.id.clone(),
            name: present(&p.name).or_else(|| present(&p.email)).unwrap_or_else(|| "Unknown User".into()),
            email: present(&p.email).unwrap_or_else(|| "—".into()),
            joined: p.created_at.map(|t| t.format("%Y-%m-%d").to_string()),
            last_updated: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total: usize,
    /// Touched since the start of the current UTC day.
    pub active_today: usize,
    pub new_this_week: usize,
}

impl UserStats {
    pub fn compute(rows: &[Profile], now: DateTime<Utc>) -> Self {
        let start_of_day = now.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now);
        let week_ago = start_of_day - Duration::days(7);
        UserStats {
            total: rows.len(),
            active_today: rows.iter().filter(|p| p.updated_at.is_some_and(|t| t >= start_of_day)).count(),
            new_this_week: rows.iter().filter(|p| p.created_at.is_some_and(|t| t >= week_ago)).count(),
        }
    }
}

fn csv_field(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `users.csv` export of the table as shown.
pub fn users_csv(rows: &[UserRow]) -> String {
    let mut lines = vec!["ID,Name,Email,Joined,LastUpdated".to_string()];
    for r in rows {
        let updated = r.last_updated.map(|t| t.to_rfc3339()).unwrap_or_default();
        let fields = [r.id.as_str(), r.name.as_str(), r.email.as_str(), r.joined.as_deref().unwrap_or("—"), updated.as_str()];
        lines.push(fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

pub struct AdminUsers {
    store: Arc<dyn ProfileStore>,
    identities: Option<Arc<dyn IdentityAdmin>>,
}

impl AdminUsers {
    pub fn new(store: Arc<dyn ProfileStore>, identities: Option<Arc<dyn IdentityAdmin>>) -> Self {
        Self { store, identities }
    }

    /// Regular users, newest first.
    pub async fn list_profiles(&self) -> Result<Vec<Profile>, AdminError> {
        Ok(self.store.select_by_role(Role::User).await?)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>, AdminError> {
        Ok(self.list_profiles().await?.iter().map(UserRow::from).collect())
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<UserStats, AdminError> {
        Ok(UserStats::compute(&self.list_profiles().await?, now))
    }

    /// Remove the profile row only. The identity survives.
    pub async fn delete_profile(&self, id: &str) -> Result<(), AdminError> {
        if !self.store.delete_by_id(id).await? {
            return Err(AdminError::NotFound(id.to_string()));
        }
        info!(target: "auth", user = id, "profile deleted, identity kept");
        Ok(())
    }

    /// Remove the identity and then its profile row.
    pub async fn delete_account(&self, id: &str) -> Result<(), AdminError> {
        let Some(identities) = self.identities.as_ref() else {
            return Err(AdminError::NoAdminCapability);
        };
        identities.delete_identity(id).await?;
        if !self.store.delete_by_id(id).await? {
            warn!(target: "auth", user = id, "identity deleted but no profile row existed");
        }
        info!(target: "auth", user = id, "account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::CountingStore;
    use crate::identity::{MemoryBackend, MemoryProfileStore};
    use chrono::TimeZone;
    use serde_json::Map;

    fn profile(id: &str, role: &str, created: DateTime<Utc>, updated: Option<DateTime<Utc>>) -> Profile {
        Profile {
            role: Some(role.into()),
            email: Some(format!("{id}@site.io")),
            created_at: Some(created),
            updated_at: updated,
            ..Profile::new(id)
        }
    }

    #[tokio::test]
    async fn lists_only_users_newest_first() {
        let t = |d| Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap();
        let mem = MemoryProfileStore::new();
        mem.insert(profile("old", "user", t(1), None));
        mem.insert(profile("new", "user", t(5), Some(t(5))));
        mem.insert(profile("boss", "admin", t(9), None));
        let admin = AdminUsers::new(Arc::new(mem), None);

        let rows = admin.list_users().await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["new", "old"]);
        assert_eq!(rows[0].name, "new@site.io");
        assert_eq!(rows[0].joined.as_deref(), Some("2026-03-05"));

        let stats = admin.stats(Utc.with_ymd_and_hms(2026, 3, 5, 18, 0, 0).unwrap()).await.unwrap();
        assert_eq!(stats, UserStats { total: 2, active_today: 1, new_this_week: 2 });
    }

    #[tokio::test]
    async fn profile_delete_leaves_identity() {
        let backend = MemoryBackend::new();
        let ident = backend.register_password_user("a@x.io", "Secr3t!pw", true, Map::new()).unwrap();
        let store = Arc::new(CountingStore::new(MemoryProfileStore::new()));
        store.inner().insert(Profile::new(ident.id.clone()));
        let admin = AdminUsers::new(store.clone(), None);

        admin.delete_profile(&ident.id).await.unwrap();
        assert!(backend.identity(&ident.id).is_some());
        assert_eq!(admin.delete_profile(&ident.id).await, Err(AdminError::NotFound(ident.id.clone())));
        assert_eq!(admin.delete_account(&ident.id).await, Err(AdminError::NoAdminCapability));
    }

    #[tokio::test]
    async fn account_delete_removes_both() {
        let backend = MemoryBackend::new();
        let ident = backend.register_password_user("b@x.io", "Secr3t!pw", true, Map::new()).unwrap();
        let mem = MemoryProfileStore::new();
        mem.insert(Profile::new(ident.id.clone()));
        let store = Arc::new(mem);
        let admin = AdminUsers::new(store.clone(), Some(backend.clone() as Arc<dyn IdentityAdmin>));

        admin.delete_account(&ident.id).await.unwrap();
        assert!(backend.identity(&ident.id).is_none());
        assert!(store.get(&ident.id).is_none());
    }

    #[test]
    fn csv_quotes_fields() {
        let rows = vec![UserRow { id: "1".into(), name: "Al \"Ace\"".into(), email: "a@x.io".into(), joined: None, last_updated: None }];
        let csv = users_csv(&rows);
        assert_eq!(csv.lines().nth(1), Some("\"1\",\"Al \"\"Ace\"\"\",\"a@x.io\",\"—\",\"\""));
    }
}
