#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use notice_board::{
    api::{build_router, AppState, Ports},
    attachments::{AttachmentReader, AttachmentStore},
    clock::FixedClock,
    config::Config,
    mailer::RecordingMailer,
    oauth::StaticProvider,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
};
use tokio::task::JoinHandle;

pub const T0: i64 = 1_700_000_000_000;
pub const ADMIN_LOGIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "Admin123";
pub const PASSWORD: &str = "Secret#12";

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: JoinHandle<()>,
    pub state: AppState,
    pub mailer: RecordingMailer,
    pub clock: Arc<FixedClock>,
    pub client: reqwest::Client,
    pub tmp: tempfile::TempDir,
}

pub async fn spawn_server() -> TestServer {
    spawn_with_mailer(RecordingMailer::new()).await
}

/// Object store whose deletes always fail, and uploads too when asked.
#[derive(Default)]
pub struct FlakyStore {
    pub fail_uploads: bool,
    deletes: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn delete_attempts(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl AttachmentStore for FlakyStore {
    async fn upload(&self, key: &str, _data: Bytes) -> anyhow::Result<String> {
        if self.fail_uploads {
            anyhow::bail!("bucket unavailable");
        }
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.deletes.lock().push(key.to_string());
        anyhow::bail!("bucket unavailable")
    }

    async fn open(&self, _key: &str) -> anyhow::Result<Option<AttachmentReader>> {
        Ok(None)
    }

    fn public_url(&self, key: &str) -> String {
        format!("http://bucket.invalid/attachments/{key}")
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub async fn spawn_with_store(store: Arc<FlakyStore>) -> TestServer {
    spawn_with(RecordingMailer::new(), Some(store as Arc<dyn AttachmentStore>)).await
}

pub async fn spawn_with_mailer(mailer: RecordingMailer) -> TestServer {
    spawn_with(mailer, None).await
}

async fn spawn_with(
    mailer: RecordingMailer,
    attachments: Option<Arc<dyn AttachmentStore>>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config::for_data_dir(addr.to_string(), tmp.path());
    let clock = Arc::new(FixedClock::new(T0));
    let ports = Ports {
        mailer: Arc::new(mailer.clone()),
        identity_provider: Some(Arc::new(
            StaticProvider::default().with("tok-ravi", "ravi@gmail.com", "Ravi Kumar"),
        )),
        clock: clock.clone(),
        persistence: None,
        attachments,
    };
    let state = AppState::with_ports(config, ports).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        addr,
        server,
        state,
        mailer,
        clock,
        client: reqwest::Client::new(),
        tmp,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn captcha(&self) -> (String, String) {
        let v: Value = self
            .client
            .get(self.url("/api/captcha"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        (
            v["id"].as_str().unwrap().to_string(),
            v["text"].as_str().unwrap().to_string(),
        )
    }

    pub async fn try_login(&self, identifier: &str, secret: &str) -> reqwest::Response {
        let (captcha_id, captcha) = self.captcha().await;
        self.client
            .post(self.url("/api/login"))
            .json(&json!({
                "identifier": identifier,
                "secret": secret,
                "captcha_id": captcha_id,
                "captcha": captcha,
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> String {
        let resp = self.try_login(identifier, secret).await;
        assert_eq!(resp.status(), 200);
        let v: Value = resp.json().await.unwrap();
        v["token"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_LOGIN, ADMIN_PASSWORD).await
    }

    pub async fn request_signup(
        &self,
        username: &str,
        email: &str,
        role: &str,
        dept: &str,
    ) -> reqwest::Response {
        let (captcha_id, captcha) = self.captcha().await;
        self.client
            .post(self.url("/api/signup/otp"))
            .json(&json!({
                "username": username,
                "email": email,
                "password": PASSWORD,
                "confirm": PASSWORD,
                "role": role,
                "dept": dept,
                "captcha_id": captcha_id,
                "captcha": captcha,
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn verify_signup(&self, email: &str, otp: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/signup/verify"))
            .json(&json!({"email": email, "otp": otp}))
            .send()
            .await
            .unwrap()
    }

    /// Full signup followed by a login; returns a session token.
    pub async fn register(&self, username: &str, role: &str, dept: &str) -> String {
        let email = format!("{username}@college.edu");
        let resp = self.request_signup(username, &email, role, dept).await;
        assert_eq!(resp.status(), 202);
        let otp = self.mailer.last_otp(&email).unwrap();
        assert_eq!(self.verify_signup(&email, &otp).await.status(), 201);
        self.login(username, PASSWORD).await
    }

    pub async fn create_notice(&self, token: &str, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/notices"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        resp.json().await.unwrap()
    }

    pub async fn get_json(&self, token: &str, path: &str) -> Value {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "GET {path}: {}", resp.status());
        resp.json().await.unwrap()
    }

    pub async fn post_empty(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

pub fn notice_body(title: &str, category: &str, priority: &str, dept: &str) -> Value {
    json!({
        "title": title,
        "desc": format!("{title} details"),
        "category": category,
        "priority": priority,
        "dept": dept,
    })
}

pub fn titles(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|n| n["title"].as_str().unwrap().to_string())
        .collect()
}
