#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use agora_api::{
    config::Config,
    db,
    mail::{Mailer, MemoryTransport},
    router, AppState,
};

pub const PASSWORD: &str = "Secret123";
const SECRET: &str = "test-secret-test-secret-test-secret!";

pub struct TestApp {
    pub router: Router,
    pub mail: MemoryTransport,
    _dir: TempDir,
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    pub cookie: Option<String>,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("forum.db").display().to_string();
        let uploads = dir.path().join("uploads").display().to_string();
        let config = Config::from_lookup(|key| match key {
            "SESSION_SECRET" => Some(SECRET.to_string()),
            "DB_NAME" => Some(db_path.clone()),
            "UPLOAD_FOLDER" => Some(uploads.clone()),
            _ => None,
        })
        .unwrap();

        let pool = db::open_pool(&config.database_path).unwrap();
        db::run_migrations(&pool).unwrap();
        std::fs::create_dir_all(&config.img_upload_dir).unwrap();

        let mail = MemoryTransport::default();
        let state = AppState {
            db: pool,
            config: Arc::new(config),
            mailer: Mailer::spawn(Arc::new(mail.clone())),
        };
        Self {
            router: router(state),
            mail,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Reply {
            status,
            body,
            cookie,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Reply {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> Reply {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn action(&self, cookie: &str, thread: &str, action: &str, body: Value) -> Reply {
        self.post(&format!("/api/thread/{thread}/{action}"), Some(cookie), body)
            .await
    }

    /// Registers an account and returns its session cookie. The account is
    /// not verified yet.
    pub async fn register(&self, username: &str) -> String {
        let reply = self
            .post(
                "/api/auth/register",
                None,
                json!({
                    "email": format!("{username}@example.org"),
                    "username": username,
                    "firstName": "Test",
                    "lastName": "User",
                    "password": PASSWORD,
                }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
        reply.cookie.expect("session cookie")
    }

    /// Waits for the `nth` mail sent to `to` (counting from zero) and pulls
    /// the token out of its link. Delivery is asynchronous.
    pub async fn nth_token(&self, to: &str, nth: usize) -> String {
        for _ in 0..100 {
            let mail = self.mail.sent().into_iter().filter(|m| m.to == to).nth(nth);
            if let Some(mail) = mail {
                let (_, rest) = mail.body.split_once("token=").expect("token link");
                return rest.split_whitespace().next().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no mail #{nth} for {to}");
    }

    pub async fn token_for(&self, to: &str) -> String {
        self.nth_token(to, 0).await
    }

    pub async fn verify(&self, username: &str) {
        let token = self.token_for(&format!("{username}@example.org")).await;
        let reply = self
            .post("/api/auth/verify", None, json!({ "token": token }))
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
    }

    /// A verified account, ready to write.
    pub async fn member(&self, username: &str) -> String {
        let cookie = self.register(username).await;
        self.verify(username).await;
        cookie
    }

    pub async fn create_thread(&self, cookie: &str, name: &str) {
        let reply = self
            .post("/api/threads", Some(cookie), json!({ "name": name }))
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
    }

    /// Posts a message and returns its id.
    pub async fn send_message(&self, cookie: &str, thread: &str, title: &str) -> String {
        let reply = self
            .action(
                cookie,
                thread,
                "sendMessage",
                json!({ "title": title, "content": "body text" }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
        reply.body["messageId"].as_str().unwrap().to_string()
    }

    pub async fn messages(&self, cookie: Option<&str>, query: &str) -> Reply {
        self.get(&format!("/api/thread/messages?{query}"), cookie)
            .await
    }
}
