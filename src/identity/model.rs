use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::role::Role;

/// Authentication method linked to an identity (`email`, `google`, `github`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkedMethod {
    pub provider: String,
}

/// Provider-managed account record. The id is stable across every linked sign-in method.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub identities: Vec<LinkedMethod>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

// Providers disagree on which key carries the display name.
const METADATA_NAME_KEYS: [&str; 4] = ["name", "full_name", "user_name", "user"];

impl Identity {
    pub fn has_password_identity(&self) -> bool {
        self.identities.iter().any(|m| m.provider == "email")
    }

    /// First non-empty name-like value in the metadata bag.
    pub fn metadata_name(&self) -> Option<&str> {
        METADATA_NAME_KEYS
            .iter()
            .filter_map(|k| self.metadata.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn email_local_part(&self) -> &str {
        let email = self.email.as_deref().unwrap_or("");
        email.split('@').next().unwrap_or("")
    }
}

/// Live authenticated context for one identity. Expiry is the provider's concern;
/// this crate only ever checks presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub identity_id: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Application-owned record mirroring one identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: None, name: None, email: None, bio: None, created_at: None, updated_at: None }
    }

    /// Stored role mapped onto the closed enum; unknown values fall back to `User`.
    pub fn role(&self) -> Role {
        Role::from_stored(self.role.as_deref())
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().map(|n| !n.trim().is_empty()).unwrap_or(false)
    }
}

/// Insert-or-update keyed on identity id. `None` fields are left untouched on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpsert {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Partial update of an existing row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn touch(at: DateTime<Utc>) -> Self {
        Self { updated_at: Some(at), ..Default::default() }
    }
}

/// Fields accepted by `update_user`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(email: Option<&str>, meta: Value) -> Identity {
        Identity {
            id: "u1".into(),
            email: email.map(str::to_string),
            metadata: meta.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn metadata_name_prefers_earlier_keys_and_skips_blanks() {
        let id = identity(None, json!({"full_name": "  ", "user_name": "octo", "user": "x"}));
        assert_eq!(id.metadata_name(), Some("octo"));
        let id = identity(None, json!({"name": "Ada", "full_name": "Ada Lovelace"}));
        assert_eq!(id.metadata_name(), Some("Ada"));
        assert_eq!(identity(None, json!({"avatar": 1})).metadata_name(), None);
    }

    #[test]
    fn email_local_part_handles_missing_at_and_missing_email() {
        assert_eq!(identity(Some("jane@example.com"), json!({})).email_local_part(), "jane");
        assert_eq!(identity(Some("plain"), json!({})).email_local_part(), "plain");
        assert_eq!(identity(None, json!({})).email_local_part(), "");
    }

    #[test]
    fn upsert_omits_unset_fields() {
        let up = ProfileUpsert { id: "u1".into(), name: Some("n".into()), ..Default::default() };
        let v = serde_json::to_value(&up).unwrap();
        assert_eq!(v, json!({"id": "u1", "name": "n"}));
    }
}
