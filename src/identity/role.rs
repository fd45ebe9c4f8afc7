use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Application role stored on the profile row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct RoleParseError(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Total mapping from the stored column. Absent or empty means `User`;
    /// anything unrecognised is logged and treated as `User`.
    pub fn from_stored(raw: Option<&str>) -> Role {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else { return Role::User };
        match raw.parse() {
            Ok(role) => role,
            Err(RoleParseError(value)) => {
                warn!(target: "auth", role = %value, "unrecognised profile role, treating as user");
                Role::User
            }
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" user ".parse::<Role>(), Ok(Role::User));
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn stored_values_map_totally() {
        assert_eq!(Role::from_stored(Some("admin")), Role::Admin);
        assert_eq!(Role::from_stored(Some("ADMIN")), Role::Admin);
        assert_eq!(Role::from_stored(Some("moderator")), Role::User);
        assert_eq!(Role::from_stored(Some("")), Role::User);
        assert_eq!(Role::from_stored(None), Role::User);
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
