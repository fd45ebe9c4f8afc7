//!
//! detectify HTTP server
//! ---------------------
//! Axum routes over the identity flows and the assistant proxy.
//!
//! Responsibilities:
//! - Map each browser to a [`Client`] through an opaque session cookie.
//! - Drive login, sign-up, password reset, the auth callback and sign-out.
//! - Gate everything under `/admin` on the stored role, re-checked per request.
//! - Serve the account and admin JSON used by the frontend.
//! - Forward assistant questions to the completion API.
//!
//! Navigation outcomes are `303 See Other`; errors are JSON via [`AppError`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{FromRequestParts, Path, Query, RawQuery, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::assistant::{Assistant, AssistantError, AssistantRequest};
use crate::config::{BackendKind, Config};
use crate::error::AppError;
use crate::identity::{
    AccountError, AccountService, AdminContext, AdminUsers, Backend, CallbackFlow, CallbackLatches, CallbackOutcome,
    CallbackParams, CallbackState, CallbackTiming, Client, ClientRegistry, GateDecision, LoginFlow, MemoryStack,
    Navigation, OAuthProvider, OnceLatch, RestStack, RoleGate, SessionEvent, SignUpForm, SignUpOutcome, LOGIN_PATH, users_csv,
};

const SESSION_COOKIE: &str = "detectify_session";
const CLIENT_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const PRUNE_EVERY: Duration = Duration::from_secs(5 * 60);

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    /// One latch per authorization code, shared by duplicate callback deliveries.
    pub latches: Arc<CallbackLatches>,
    pub assistant: Arc<Assistant>,
    pub site_origin: String,
    pub timing: CallbackTiming,
    /// Add `Secure` to the session cookie; on when the site origin is https.
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(config: &Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            clients: Arc::new(ClientRegistry::new(backend, CLIENT_IDLE_TTL)),
            latches: Arc::new(CallbackLatches::new()),
            assistant: Arc::new(Assistant::new(config.assistant.clone())),
            site_origin: config.site_origin.clone(),
            timing: config.callback_timing(),
            secure_cookies: config.site_origin.starts_with("https://"),
        }
    }

    /// Finish a response for `visit`. A fresh client is registered and handed a
    /// cookie once it is signed in.
    fn reply(&self, visit: &Visit, resp: impl IntoResponse) -> Response {
        self.finish(visit, visit.client.hub.is_signed_in(), resp)
    }

    /// Like [`AppState::reply`], but registers a fresh client regardless.
    fn keep(&self, visit: &Visit, resp: impl IntoResponse) -> Response {
        self.finish(visit, true, resp)
    }

    fn finish(&self, visit: &Visit, keep: bool, resp: impl IntoResponse) -> Response {
        if !(visit.fresh && keep) {
            return resp.into_response();
        }
        self.clients.register(visit.client.clone());
        respond(set_session_cookie(&visit.client.id, self.secure_cookies), resp)
    }

    fn login_flow(&self, client: &Client) -> LoginFlow {
        LoginFlow::new(client.provider.clone(), client.store.clone(), &self.site_origin)
    }

    fn account(&self, client: &Client) -> AccountService {
        AccountService::new(client.provider.clone(), client.store.clone())
    }

    fn admin_users(&self, client: &Client) -> AdminUsers {
        AdminUsers::new(client.store.clone(), self.clients.backend().identity_admin())
    }
}

/// The browser behind a request. A `fresh` client came without a known cookie
/// and is not registered yet.
pub struct Visit {
    client: Arc<Client>,
    fresh: bool,
}

impl FromRequestParts<AppState> for Visit {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let sid = parse_cookie(&parts.headers, SESSION_COOKIE);
        match state.clients.get_or_fresh(sid.as_deref()) {
            Ok((client, fresh)) => Ok(Visit { client, fresh }),
            Err(e) => {
                error!(target: "auth", error = %e, "no randomness for a client id");
                Err(AppError::internal("client_id", "could not start a session").into_response())
            }
        }
    }
}

/// Build the configured backend.
pub fn backend_for(config: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    match (config.backend, &config.supabase) {
        (BackendKind::Memory, _) => Ok(Arc::new(MemoryStack::new())),
        (BackendKind::Rest, Some(s)) => {
            let stack = RestStack::new(s.url.clone(), &s.publishable_key, s.service_role_key.clone())
                .context("configuring rest backend")?;
            Ok(Arc::new(stack))
        }
        (BackendKind::Rest, None) => anyhow::bail!("rest backend selected but SUPABASE_URL is not configured"),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/login", get(login_page).post(login))
        .route("/login/oauth/{provider}", get(oauth_start))
        .route("/signup", post(sign_up))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/events", get(auth_events))
        .route("/logout", post(logout))
        .route("/reset", post(request_reset))
        .route("/reset-password", get(reset_password_page).post(reset_password))
        .route("/account", get(account))
        .route("/account/profile", post(account_profile))
        .route("/account/password", post(account_password))
        .route("/account/resend-verification", post(account_resend))
        .route("/admin", get(admin_home))
        .route("/admin/users", get(admin_users))
        .route("/admin/users.csv", get(admin_users_csv))
        .route("/admin/users/{id}", delete(admin_delete_user))
        .route("/admin/{*rest}", get(admin_page))
        .route("/api/assistant", post(assistant))
        .with_state(state)
}

/// Serve on an already bound listener. Tests bind port 0 and call this.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let clients = state.clients.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_EVERY);
        loop {
            tick.tick().await;
            let dropped = clients.prune();
            if dropped > 0 {
                info!(target: "startup", dropped, "pruned idle clients");
            }
        }
    });
    axum::serve(listener, router(state)).await.context("http server failed")
}

/// Start the HTTP server for `config`.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let backend = backend_for(&config)?;
    info!(target: "startup", backend = backend.name(), site_origin = %config.site_origin, "identity backend ready");
    let state = AppState::new(&config, backend);
    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(target: "startup", "HTTP listening on http://{addr}");
    serve(listener, state).await
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(s) = value.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

// SameSite=Lax so the cookie survives the top-level redirect back from the OAuth provider.
fn set_session_cookie(sid: &str, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={sid}; HttpOnly{secure}; SameSite=Lax; Path=/")).ok()
}

fn clear_session_cookie(secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly{secure}; SameSite=Lax; Path=/"
    ))
    .ok()
}

fn respond(cookie: Option<HeaderValue>, resp: impl IntoResponse) -> Response {
    let mut resp = resp.into_response();
    if let Some(c) = cookie {
        resp.headers_mut().append(header::SET_COOKIE, c);
    }
    resp
}

/// Redirect to `to`; a target that cannot be a header value goes home.
fn see_other(to: &str) -> Response {
    let location = HeaderValue::from_str(to).unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
}

/// Same-origin relative path, refusing protocol-relative, backslash and control-character forms.
fn local_path(p: Option<&str>) -> Option<&str> {
    p.filter(|p| p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') && !p.chars().any(char::is_control))
}

fn login_redirect(redirected_from: &str) -> String {
    format!("{LOGIN_PATH}?redirectedFrom={}", urlencoding::encode(redirected_from))
}

fn navigate(nav: Navigation) -> Response {
    let Some(notice) = nav.notice.filter(|_| !nav.after.is_zero()) else {
        return see_other(&nav.to);
    };
    let status = match nav.state {
        CallbackState::Resolve => "verified",
        _ => "failed",
    };
    let to = if HeaderValue::from_str(&nav.to).is_ok() { nav.to } else { "/".to_string() };
    let refresh = format!("{}; url={to}", nav.after.as_secs_f64().ceil() as u64);
    let body = json!({"status": status, "notice": notice, "redirect": to, "after_ms": nav.after.as_millis() as u64});
    (StatusCode::OK, [("refresh", refresh)], Json(body)).into_response()
}

async fn gate(client: &Client, path: &str) -> Result<AdminContext, Response> {
    match RoleGate::new(client.provider.clone(), client.store.clone()).check(path).await {
        GateDecision::Allow(ctx) => Ok(ctx),
        GateDecision::RedirectToLogin { redirected_from } => Err(see_other(&login_redirect(&redirected_from))),
        GateDecision::RedirectHome => Err(see_other("/")),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReturnQuery {
    #[serde(rename = "redirectedFrom")]
    redirected_from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
    #[serde(default, rename = "redirectedFrom")]
    redirected_from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailPayload {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Default, Deserialize)]
struct CodeQuery {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PasswordPayload {
    #[serde(default)]
    password: String,
    #[serde(default, rename = "confirmPassword")]
    confirm_password: String,
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    bio: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    cascade: bool,
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "detectify"}))
}

async fn login_page(State(state): State<AppState>, visit: Visit, Query(q): Query<ReturnQuery>) -> Response {
    let client = &visit.client;
    let from = local_path(q.redirected_from.as_deref());
    let resp = match state.login_flow(client).resume(from).await {
        Some(target) => see_other(target.as_path()),
        None => Json(json!({"status": "anonymous"})).into_response(),
    };
    state.reply(&visit, resp)
}

async fn login(State(state): State<AppState>, visit: Visit, Json(payload): Json<LoginPayload>) -> Response {
    let client = &visit.client;
    let from = local_path(payload.redirected_from.as_deref());
    let resp = match state.login_flow(client).sign_in(&payload.email, &payload.password, from).await {
        Ok(target) => Json(json!({"status": "ok", "redirect": target.as_path()})).into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn oauth_start(
    State(state): State<AppState>,
    visit: Visit,
    Path(provider): Path<String>,
    Query(q): Query<ReturnQuery>,
) -> Response {
    let client = &visit.client;
    let provider = match provider.parse::<OAuthProvider>() {
        Ok(p) => p,
        Err(_) => return state.reply(&visit, AppError::not_found("unknown_provider".to_string(), format!("unknown provider '{provider}'"))),
    };
    let from = local_path(q.redirected_from.as_deref());
    let resp = match state.login_flow(client).oauth_start(provider, from).await {
        Ok(url) => return state.keep(&visit, see_other(&url)),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn sign_up(State(state): State<AppState>, visit: Visit, Json(form): Json<SignUpForm>) -> Response {
    let client = &visit.client;
    let resp = match state.login_flow(client).sign_up(&form).await {
        Ok(SignUpOutcome::VerifyEmail { email }) => Json(json!({"status": "verify_email", "email": email})).into_response(),
        Ok(SignUpOutcome::SignedIn(target)) => Json(json!({"status": "ok", "redirect": target.as_path()})).into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn auth_callback(State(state): State<AppState>, visit: Visit, RawQuery(query): RawQuery) -> Response {
    let client = &visit.client;
    let mut params = match CallbackParams::from_parts(query.as_deref(), None) {
        Ok(p) => p,
        Err(e) => {
            warn!(target: "callback", error = %e, "unparseable callback");
            return state.reply(&visit, see_other(LOGIN_PATH));
        }
    };
    if params.next.is_some() && local_path(params.next.as_deref()).is_none() {
        warn!(target: "callback", "dropping non-local next parameter");
        params.next = None;
    }
    let latch = match params.code.as_deref() {
        Some(code) => state.latches.latch_for(code),
        None => Arc::new(OnceLatch::new()),
    };
    let flow = CallbackFlow::new(client.provider.clone(), client.store.clone(), latch).with_timing(state.timing);
    let resp = match flow.run(&params).await {
        CallbackOutcome::AlreadyHandled => StatusCode::NO_CONTENT.into_response(),
        CallbackOutcome::Navigate(nav) => navigate(nav),
    };
    state.reply(&visit, resp)
}

fn auth_event(name: &'static str) -> Result<Event, Infallible> {
    Ok(Event::default().event("auth").data(name))
}

/// Live sign-in state for this browser: the current state first, then every change.
async fn auth_events(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    let sub = client.provider.subscribe();
    let initial = if client.hub.is_signed_in() { "signed_in" } else { "signed_out" };
    let changes = stream::unfold(sub, |mut sub| async move {
        let name = match sub.recv().await? {
            SessionEvent::SignedIn(_) => "signed_in",
            SessionEvent::SignedOut => "signed_out",
            SessionEvent::UserUpdated => "user_updated",
        };
        Some((auth_event(name), sub))
    });
    let events = stream::once(async move { auth_event(initial) }).chain(changes);
    state.keep(&visit, Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(client) = parse_cookie(&headers, SESSION_COOKIE).and_then(|sid| state.clients.get(&sid)) {
        state.login_flow(&client).sign_out().await;
        state.clients.close(&client.id);
        info!(target: "auth", "client signed out");
    }
    respond(clear_session_cookie(state.secure_cookies), see_other(LOGIN_PATH))
}

async fn request_reset(State(state): State<AppState>, visit: Visit, Json(payload): Json<EmailPayload>) -> Response {
    let client = &visit.client;
    let resp = match state.login_flow(client).request_password_reset(&payload.email).await {
        Ok(()) => Json(json!({"status": "ok", "message": "Check your email for a password reset link."})).into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

/// Landing page of the reset email. A code is exchanged for a recovery session.
async fn reset_password_page(State(state): State<AppState>, visit: Visit, Query(q): Query<CodeQuery>) -> Response {
    let client = &visit.client;
    if let Some(code) = q.code.as_deref().filter(|c| !c.is_empty()) {
        if let Err(e) = client.provider.exchange_code_for_session(code).await {
            info!(target: "auth", code = e.code(), "reset link rejected");
            return state.reply(&visit, AppError::from(e));
        }
    }
    let resp = match client.provider.get_session().await {
        Ok(Some(_)) => Json(json!({"status": "ready"})).into_response(),
        Ok(None) => see_other(LOGIN_PATH),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn reset_password(State(state): State<AppState>, visit: Visit, Json(payload): Json<PasswordPayload>) -> Response {
    let client = &visit.client;
    let resp = match state.login_flow(client).complete_password_reset(&payload.password).await {
        Ok(()) => see_other(LOGIN_PATH),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn account(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    let resp = match state.account(client).load().await {
        Ok(view) => Json(view).into_response(),
        Err(AccountError::SignedOut) => see_other(&login_redirect("/account")),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

fn saved(result: Result<&'static str, AccountError>) -> Response {
    match result {
        Ok(message) => Json(json!({"status": "ok", "message": message})).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

async fn account_profile(State(state): State<AppState>, visit: Visit, Json(payload): Json<ProfilePayload>) -> Response {
    let client = &visit.client;
    state.reply(&visit, saved(state.account(client).save_profile(&payload.name, &payload.bio).await))
}

async fn account_password(State(state): State<AppState>, visit: Visit, Json(payload): Json<PasswordPayload>) -> Response {
    let client = &visit.client;
    let result = state.account(client).change_password(&payload.password, &payload.confirm_password).await;
    state.reply(&visit, saved(result))
}

async fn account_resend(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    state.reply(&visit, saved(state.account(client).resend_verification().await))
}

async fn admin_home(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    let ctx = match gate(client, "/admin").await {
        Ok(ctx) => ctx,
        Err(redirect) => return state.reply(&visit, redirect),
    };
    let resp = match state.admin_users(client).stats(Utc::now()).await {
        Ok(stats) => Json(json!({
            "status": "ok",
            "admin": {"id": ctx.session.identity_id, "name": ctx.profile.name},
            "stats": stats,
        }))
        .into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn admin_users(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    if let Err(redirect) = gate(client, "/admin/users").await {
        return state.reply(&visit, redirect);
    }
    let resp = match state.admin_users(client).list_users().await {
        Ok(users) => Json(json!({"status": "ok", "users": users})).into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn admin_users_csv(State(state): State<AppState>, visit: Visit) -> Response {
    let client = &visit.client;
    if let Err(redirect) = gate(client, "/admin/users.csv").await {
        return state.reply(&visit, redirect);
    }
    let resp = match state.admin_users(client).list_users().await {
        Ok(users) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
            ],
            users_csv(&users),
        )
            .into_response(),
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

async fn admin_delete_user(
    State(state): State<AppState>,
    visit: Visit,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Response {
    let client = &visit.client;
    let ctx = match gate(client, &format!("/admin/users/{id}")).await {
        Ok(ctx) => ctx,
        Err(redirect) => return state.reply(&visit, redirect),
    };
    let admin = state.admin_users(client);
    let result = if q.cascade { admin.delete_account(&id).await } else { admin.delete_profile(&id).await };
    let resp = match result {
        Ok(()) => {
            info!(target: "gate", admin = %ctx.session.identity_id, user = %id, cascade = q.cascade, "user deleted");
            Json(json!({"status": "ok"})).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    };
    state.reply(&visit, resp)
}

/// Any other admin screen: the gate decides, the frontend renders.
async fn admin_page(State(state): State<AppState>, visit: Visit, Path(rest): Path<String>) -> Response {
    let client = &visit.client;
    let path = format!("/admin/{rest}");
    let resp = match gate(client, &path).await {
        Ok(_) => Json(json!({"status": "ok", "path": path})).into_response(),
        Err(redirect) => redirect,
    };
    state.reply(&visit, resp)
}

async fn assistant(State(state): State<AppState>, Json(req): Json<AssistantRequest>) -> Response {
    let prepared = match req.sanitize() {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    };
    match state.assistant.reply(&prepared).await {
        Ok(reply) => Json(json!({"reply": reply})).into_response(),
        Err(e) => {
            match &e {
                AssistantError::NotConfigured => warn!(target: "assistant", "assistant request without OPENAI_API_KEY"),
                _ => error!(target: "assistant", error = %e, "assistant request failed"),
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Assistant failed"}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        h
    }

    #[test]
    fn parse_cookie_finds_named_value() {
        let h = headers("theme=dark; detectify_session=abc=def; other=1");
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("abc=def"));
        assert_eq!(parse_cookie(&h, "missing"), None);
    }

    #[test]
    fn session_cookie_secure_only_over_https() {
        let plain = set_session_cookie("sid", false).unwrap();
        assert_eq!(plain.to_str().unwrap(), "detectify_session=sid; HttpOnly; SameSite=Lax; Path=/");
        let secure = set_session_cookie("sid", true).unwrap();
        assert!(secure.to_str().unwrap().contains("; Secure;"));
        assert!(clear_session_cookie(false).unwrap().to_str().unwrap().contains("Expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn local_path_rejects_off_site_targets() {
        assert_eq!(local_path(Some("/admin/users")), Some("/admin/users"));
        assert_eq!(local_path(Some("//evil.example")), None);
        assert_eq!(local_path(Some("/\\evil.example")), None);
        assert_eq!(local_path(Some("https://evil.example")), None);
        assert_eq!(local_path(Some("/news\nx")), None);
        assert_eq!(local_path(Some("/news\tx")), None);
        assert_eq!(local_path(None), None);
    }

    #[test]
    fn unencodable_targets_navigate_home() {
        let resp = see_other("/news\r\nx");
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/");

        let resp = navigate(Navigation {
            to: "/news\nx".into(),
            after: Duration::from_secs(3),
            notice: Some("done".into()),
            state: CallbackState::Resolve,
        });
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("refresh").unwrap(), "3; url=/");
    }

    #[test]
    fn login_redirect_encodes_path() {
        assert_eq!(login_redirect("/admin/users"), "/login?redirectedFrom=%2Fadmin%2Fusers");
    }

    #[test]
    fn delayed_navigation_uses_refresh() {
        let resp = navigate(Navigation {
            to: "/admin".into(),
            after: Duration::from_millis(2500),
            notice: Some("done".into()),
            state: CallbackState::Resolve,
        });
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("refresh").unwrap(), "3; url=/admin");

        let resp = navigate(Navigation { to: "/login".into(), after: Duration::ZERO, notice: None, state: CallbackState::Failed });
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
    }
}
