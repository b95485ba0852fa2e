//! In-process router harness for handler tests.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use stackline_db::Database;
use stackline_db::queries::users::NewUser;
use stackline_gateway::dispatcher::Dispatcher;
use stackline_types::models::Role;

use crate::auth::{AppState, AppStateInner, create_token};
use crate::convert::user_response;
use crate::routes::router;

pub const TEST_SECRET: &str = "test-secret-for-router-tests";

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: TEST_SECRET.to_string(),
            dispatcher: Dispatcher::new(),
            google: None,
        });
        let router = router(state.clone());
        Self { state, router }
    }

    /// Insert a user directly and return its id and a session token.
    pub fn user(&self, email: &str, role: Role) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.state
            .db
            .create_user(&NewUser {
                id: &id.to_string(),
                email,
                password_hash: None,
                role,
                google_id: None,
                name: None,
                company: None,
                phone: None,
            })
            .unwrap();
        let row = self.state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        let token = create_token(TEST_SECRET, &user_response(&row)).unwrap();
        (id, token)
    }

    pub fn client(&self, email: &str) -> (Uuid, String) {
        self.user(email, Role::Client)
    }

    pub fn admin(&self, email: &str) -> (Uuid, String) {
        self.user(email, Role::Admin)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        self.request(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn patch(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        self.request(Method::PATCH, uri, token, Some(body)).await
    }
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
