//! HTTP integration tests against the in-process backend.
//! Each test binds an ephemeral port and drives the routes with reqwest,
//! carrying the session cookie by hand so redirects can be inspected.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, Response, StatusCode};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use detectify::config::Config;
use detectify::identity::{ClientRegistry, MemoryStack, Outbound, Profile};
use detectify::server::{self, AppState};

async fn start() -> (Arc<MemoryStack>, String) {
    let (stack, base, _) = start_with_clients().await;
    (stack, base)
}

async fn start_with_clients() -> (Arc<MemoryStack>, String, Arc<ClientRegistry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let origin = base.clone();
    let config = Config::from_lookup(move |k| match k {
        "DETECTIFY_BACKEND" => Some("memory".into()),
        "DETECTIFY_SITE_ORIGIN" => Some(origin.clone()),
        "DETECTIFY_CALLBACK_RETRY_MS" => Some("10".into()),
        _ => None,
    })
    .unwrap();
    let stack = Arc::new(MemoryStack::new());
    let state = AppState::new(&config, stack.clone());
    let clients = state.clients.clone();
    tokio::spawn(server::serve(listener, state));
    (stack, base, clients)
}

fn seed_user(stack: &MemoryStack, email: &str, password: &str, role: Option<&str>) -> String {
    let identity = stack.directory.register_password_user(email, password, true, Map::new()).unwrap();
    if let Some(role) = role {
        let mut p = Profile::new(identity.id.clone());
        p.role = Some(role.into());
        p.email = Some(email.into());
        p.name = Some("Ada".into());
        p.created_at = Some(Utc::now());
        stack.profiles.insert(p);
    }
    identity.id
}

/// Minimal browser: no redirect following, one session cookie.
struct Browser {
    http: reqwest::Client,
    base: String,
    sid: Option<String>,
}

impl Browser {
    fn new(base: &str) -> Self {
        let http = reqwest::Client::builder().redirect(redirect::Policy::none()).build().unwrap();
        Self { http, base: base.to_string(), sid: None }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http") { path.to_string() } else { format!("{}{}", self.base, path) }
    }

    async fn send(&mut self, req: reqwest::RequestBuilder) -> Response {
        let req = match &self.sid {
            Some(sid) => req.header(COOKIE, format!("detectify_session={sid}")),
            None => req,
        };
        let resp = req.send().await.unwrap();
        for v in resp.headers().get_all(SET_COOKIE) {
            let pair = v.to_str().unwrap().split(';').next().unwrap_or_default();
            if let Some(val) = pair.strip_prefix("detectify_session=") {
                self.sid = if val == "deleted" { None } else { Some(val.to_string()) };
            }
        }
        resp
    }

    async fn get(&mut self, path: &str) -> Response {
        let req = self.http.get(self.url(path));
        self.send(req).await
    }

    async fn post(&mut self, path: &str, body: Value) -> Response {
        let req = self.http.post(self.url(path)).json(&body);
        self.send(req).await
    }

    async fn delete(&mut self, path: &str) -> Response {
        let req = self.http.delete(self.url(path));
        self.send(req).await
    }

    async fn login(&mut self, email: &str, password: &str) -> Value {
        let resp = self.post("/login", json!({"email": email, "password": password})).await;
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.unwrap()
    }
}

/// Read a streaming body until `needle` shows up, giving up after five seconds.
async fn read_until(resp: &mut Response, needle: &str) -> bool {
    let mut buf = String::new();
    let search = async {
        while let Ok(Some(chunk)) = resp.chunk().await {
            buf.push_str(&String::from_utf8_lossy(&chunk));
            if buf.contains(needle) {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), search).await.unwrap_or(false)
}

fn location(resp: &Response) -> &str {
    resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

#[tokio::test]
async fn anonymous_admin_visit_redirects_to_login_with_path() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.get("/admin/users").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login?redirectedFrom=%2Fadmin%2Fusers");
    assert!(b.sid.is_none(), "anonymous visits get no session cookie");

    let resp = b.get("/login").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], "anonymous");
}

#[tokio::test]
async fn password_login_routes_by_role_and_deep_link() {
    let (stack, base) = start().await;
    seed_user(&stack, "admin@detectify.test", "Adm1n!pass", Some("admin"));
    seed_user(&stack, "user@detectify.test", "Us3r!pass", Some("user"));

    let mut admin = Browser::new(&base);
    assert_eq!(admin.login("admin@detectify.test", "Adm1n!pass").await["redirect"], "/admin");
    let resp = admin.get("/admin").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["stats"]["total"], 1);

    // Already signed in: the login page forwards, honouring the deep link.
    let resp = admin.get("/login?redirectedFrom=/admin/reports").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/admin/reports");

    let mut user = Browser::new(&base);
    assert_eq!(user.login("user@detectify.test", "Us3r!pass").await["redirect"], "/");
    let resp = user.get("/admin").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/");

    let resp = user.post("/login", json!({"email": "user@detectify.test", "password": "wrong"})).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn off_site_redirect_target_is_ignored() {
    let (stack, base) = start().await;
    seed_user(&stack, "user@detectify.test", "Us3r!pass", None);
    let mut b = Browser::new(&base);
    let resp = b
        .post("/login", json!({"email": "user@detectify.test", "password": "Us3r!pass", "redirectedFrom": "//evil.example"}))
        .await;
    assert_eq!(resp.json::<Value>().await.unwrap()["redirect"], "/");
}

#[tokio::test]
async fn auth_events_follow_sign_in() {
    let (stack, base) = start().await;
    seed_user(&stack, "user@detectify.test", "Us3r!pass", None);
    let mut b = Browser::new(&base);
    let mut events = b.get("/auth/events").await;
    assert_eq!(events.headers().get("content-type").unwrap(), "text/event-stream");
    assert!(read_until(&mut events, "data: signed_out").await);

    b.login("user@detectify.test", "Us3r!pass").await;
    assert!(read_until(&mut events, "data: signed_in").await);
}

#[tokio::test]
async fn demotion_takes_effect_on_next_request() {
    let (stack, base) = start().await;
    let id = seed_user(&stack, "admin@detectify.test", "Adm1n!pass", Some("admin"));
    let mut b = Browser::new(&base);
    b.login("admin@detectify.test", "Adm1n!pass").await;
    assert_eq!(b.get("/admin/reports").await.status(), StatusCode::OK);

    let mut demoted = stack.profiles.get(&id).unwrap();
    demoted.role = Some("user".into());
    stack.profiles.insert(demoted);

    let resp = b.get("/admin/reports").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/");
}

#[tokio::test]
async fn oauth_callback_runs_once_per_code() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.get("/login/oauth/github?redirectedFrom=/admin/reports").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let callback = location(&resp).to_string();
    assert!(callback.starts_with(&format!("{base}/auth/callback?next=%2Fadmin%2Freports&code=")));

    let resp = b.get(&callback).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("refresh").unwrap(), "3; url=/admin/reports");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "verified");

    // Reload of the same callback URL is a no-op.
    assert_eq!(b.get(&callback).await.status(), StatusCode::NO_CONTENT);

    // Non-admin after OAuth: the gate still sends them home.
    let resp = b.get("/admin/reports").await;
    assert_eq!(location(&resp), "/");

    let account: Value = b.get("/account").await.json().await.unwrap();
    assert_eq!(account["email"], "github-user@detectify.local");
    assert_eq!(account["has_password_identity"], false);
}

#[tokio::test]
async fn concurrent_callback_deliveries_share_one_run() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.get("/login/oauth/google").await;
    let callback = location(&resp).to_string();
    let cookie = format!("detectify_session={}", b.sid.clone().unwrap());

    let http = reqwest::Client::builder().redirect(redirect::Policy::none()).build().unwrap();
    let (first, second) = futures::future::join(
        http.get(&callback).header(COOKIE, &cookie).send(),
        http.get(&callback).header(COOKIE, &cookie).send(),
    )
    .await;
    let mut statuses = vec![first.unwrap().status().as_u16(), second.unwrap().status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 204]);
}

#[tokio::test]
async fn callback_error_and_unknown_provider() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.get("/auth/callback?error=access_denied&error_description=Denied").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["redirect"], "/login");
    assert_eq!(body["notice"], "Oops: Denied");

    let resp = b.get("/auth/callback").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    assert_eq!(b.get("/login/oauth/myspace").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sign_up_then_verify_then_sign_in() {
    let (stack, base) = start().await;
    let mut b = Browser::new(&base);
    let form = json!({
        "name": "Grace",
        "email": "grace@detectify.test",
        "password": "Gr4ce!pass",
        "confirmPassword": "Gr4ce!pass",
        "acceptTerms": true,
    });
    let resp = b.post("/signup", form.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], "verify_email");

    let resp = b.post("/login", json!({"email": "grace@detectify.test", "password": "Gr4ce!pass"})).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = b.post("/signup", form).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.json::<Value>().await.unwrap()["error"],
        "The email grace@detectify.test is already associated with an account."
    );

    let link = match stack.directory.sent_mail().pop() {
        Some(Outbound::Verification { link, .. }) => link,
        other => panic!("expected verification mail, got {other:?}"),
    };
    let resp = b.get(&link).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap()["redirect"], "/");

    let mut fresh = Browser::new(&base);
    assert_eq!(fresh.login("grace@detectify.test", "Gr4ce!pass").await["redirect"], "/");
    let account: Value = fresh.get("/account").await.json().await.unwrap();
    assert_eq!(account["name"], "Grace");
    assert_eq!(account["email_verified"], true);
}

#[tokio::test]
async fn password_reset_through_emailed_link() {
    let (stack, base) = start().await;
    seed_user(&stack, "user@detectify.test", "Us3r!pass", None);
    let mut b = Browser::new(&base);

    let resp = b.post("/reset", json!({"email": ""})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = b.post("/reset", json!({"email": "user@detectify.test"})).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let link = match stack.directory.sent_mail().pop() {
        Some(Outbound::PasswordReset { link, .. }) => link,
        other => panic!("expected reset mail, got {other:?}"),
    };
    assert!(link.starts_with(&format!("{base}/reset-password?code=")));
    let resp = b.get(&link).await;
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], "ready");

    let resp = b.post("/reset-password", json!({"password": "short"})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = b.post("/reset-password", json!({"password": "N3w!password"})).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    let mut fresh = Browser::new(&base);
    fresh.login("user@detectify.test", "N3w!password").await;
}

#[tokio::test]
async fn account_updates_and_logout() {
    let (stack, base) = start().await;
    seed_user(&stack, "user@detectify.test", "Us3r!pass", None);
    let mut b = Browser::new(&base);
    b.login("user@detectify.test", "Us3r!pass").await;

    let resp = b.post("/account/profile", json!({"name": "  Lin  ", "bio": "hello"})).await;
    assert_eq!(resp.json::<Value>().await.unwrap()["message"], "Profile saved");
    let account: Value = b.get("/account").await.json().await.unwrap();
    assert_eq!(account["name"], "Lin");
    assert_eq!(account["bio"], "hello");

    let resp = b.post("/account/password", json!({"password": "N3w!password", "confirmPassword": "different"})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = b.post("/account/password", json!({"password": "N3w!password", "confirmPassword": "N3w!password"})).await;
    assert_eq!(resp.json::<Value>().await.unwrap()["message"], "Password updated");

    let resp = b.post("/logout", json!({})).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");
    assert!(b.sid.is_none());

    let resp = b.get("/account").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login?redirectedFrom=%2Faccount");
    let resp = b.post("/account/resend-verification", json!({})).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_lists_exports_and_deletes_users() {
    let (stack, base) = start().await;
    seed_user(&stack, "admin@detectify.test", "Adm1n!pass", Some("admin"));
    let victim = seed_user(&stack, "user@detectify.test", "Us3r!pass", Some("user"));
    let mut b = Browser::new(&base);
    b.login("admin@detectify.test", "Adm1n!pass").await;

    let body: Value = b.get("/admin/users").await.json().await.unwrap();
    // Only regular users are listed.
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["email"], "user@detectify.test");

    let resp = b.get("/admin/users.csv").await;
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/csv; charset=utf-8");
    let csv = resp.text().await.unwrap();
    assert!(csv.starts_with("ID,Name,Email,Joined,LastUpdated"));
    assert!(csv.contains("\"user@detectify.test\""));

    let resp = b.delete(&format!("/admin/users/{victim}?cascade=true")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(stack.profiles.get(&victim).is_none());
    assert!(stack.directory.identity(&victim).is_none());

    let resp = b.delete(&format!("/admin/users/{victim}")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let mut anon = Browser::new(&base);
    let resp = anon.delete("/admin/users/someone").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login?redirectedFrom=%2Fadmin%2Fusers%2Fsomeone");
}

#[tokio::test]
async fn assistant_validates_before_forwarding() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.post("/api/assistant", json!({"message": "  "})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"error": "Missing message"}));

    // No API key configured in tests.
    let resp = b.post("/api/assistant", json!({"message": "Is this real?"})).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"error": "Assistant failed"}));
}

#[tokio::test]
async fn anonymous_requests_leave_no_clients_behind() {
    let (stack, base, clients) = start_with_clients().await;
    seed_user(&stack, "user@detectify.test", "Us3r!pass", Some("user"));
    for _ in 0..20 {
        let mut b = Browser::new(&base);
        assert_eq!(b.get("/login").await.status(), StatusCode::OK);
        assert_eq!(b.get("/admin").await.status(), StatusCode::SEE_OTHER);
        assert_eq!(b.get("/account").await.status(), StatusCode::SEE_OTHER);
        let resp = b.post("/login", json!({"email": "user@detectify.test", "password": "wrong"})).await;
        assert!(resp.status().is_client_error());
        assert!(b.sid.is_none());
    }
    assert_eq!(clients.len(), 0);

    let mut b = Browser::new(&base);
    b.login("user@detectify.test", "Us3r!pass").await;
    assert!(b.sid.is_some());
    assert_eq!(clients.len(), 1);
}

#[tokio::test]
async fn control_characters_in_return_paths_fall_back_to_home() {
    let (_stack, base) = start().await;
    let mut b = Browser::new(&base);
    let resp = b.get("/login/oauth/github?redirectedFrom=/news%0Ax").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let start = reqwest::Url::parse(location(&resp)).unwrap();
    let next = start.query_pairs().find(|(k, _)| k == "next").map(|(_, v)| v.into_owned());
    assert_eq!(next.as_deref(), Some("/"));
    let code = start.query_pairs().find(|(k, _)| k == "code").map(|(_, v)| v.into_owned()).unwrap();

    let resp = b.get(&format!("/auth/callback?next=%2Fnews%0Ax&code={code}")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("refresh").unwrap(), "3; url=/");
    assert_eq!(b.get("/account").await.status(), StatusCode::OK);

    let resp = b.get("/login?redirectedFrom=/news%0Ax").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/");
}
