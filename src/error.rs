//! Unified application error model and its HTTP mapping.
//! Module errors (`AuthError`, `StoreError`, ...) convert into [`AppError`] at the
//! route boundary; navigation outcomes never go through here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::{AccountError, AdminError, AuthError, LoginFailure, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Upstream { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Upstream { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Upstream { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn upstream<S: Into<String>>(code: S, msg: S) -> Self { AppError::Upstream { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Upstream { .. } => 502,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({"status": "error", "code": self.code_str(), "error": self.message()});
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoSession => AppError::auth("no_session", "no active session"),
            AuthError::Rejected { code, message } => AppError::UserInput { code, message },
            AuthError::Unsupported(m) => AppError::not_found("unsupported".to_string(), m),
            AuthError::Transport(m) => AppError::upstream("auth_unavailable".to_string(), m),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.friendly_message();
        match err {
            StoreError::NotFound(_) => AppError::not_found("not_found".to_string(), message),
            StoreError::Database { code, .. } => AppError::Upstream { code: code.unwrap_or_else(|| "database".into()), message },
            StoreError::Transport(_) => AppError::upstream("store_unavailable".to_string(), message),
        }
    }
}

impl From<LoginFailure> for AppError {
    fn from(err: LoginFailure) -> Self {
        match err {
            LoginFailure::Invalid(m) => AppError::user("invalid_input".to_string(), m),
            LoginFailure::Rejected(m) => AppError::auth("rejected".to_string(), m),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        let message = err.friendly_message();
        match err {
            AccountError::SignedOut => AppError::auth("no_session".to_string(), message),
            AccountError::Invalid(_) => AppError::user("invalid_input".to_string(), message),
            AccountError::Auth(e) => AppError::from(e),
            AccountError::Store(e) => AppError::from(e),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::NotFound(id) => AppError::not_found("user_not_found".to_string(), format!("user {id} not found")),
            AdminError::NoAdminCapability => AppError::conflict("no_admin_capability", "account deletion needs the service-role key"),
            AdminError::Store(e) => AppError::from(e),
            AdminError::Auth(e) => AppError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UNDEFINED_TABLE;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::user("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(AppError::conflict("conflict", "dup").http_status(), 409);
        assert_eq!(AppError::auth("auth", "no").http_status(), 401);
        assert_eq!(AppError::upstream("upstream", "down").http_status(), 502);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn module_errors_map_to_codes() {
        let e: AppError = StoreError::database(Some(UNDEFINED_TABLE), "relation missing").into();
        assert_eq!(e.code_str(), UNDEFINED_TABLE);
        assert!(e.message().starts_with("Profiles table missing."));

        let e: AppError = AuthError::rejected("invalid_grant", "used").into();
        assert_eq!((e.http_status(), e.code_str()), (400, "invalid_grant"));

        let e: AppError = AccountError::SignedOut.into();
        assert_eq!(e.http_status(), 401);

        let e: AppError = AdminError::NoAdminCapability.into();
        assert_eq!(e.http_status(), 409);
    }

    #[test]
    fn serializes_tagged() {
        let v = serde_json::to_value(AppError::auth("no_session", "sign in")).unwrap();
        assert_eq!(v["type"], "auth");
        assert_eq!(v["code"], "no_session");
    }
}
