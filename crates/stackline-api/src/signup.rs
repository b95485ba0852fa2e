//! Multi-step signup wizard.
//!
//! Drafts are keyed by email and kept server-side for a fixed window, so a
//! visitor can leave the wizard and pick it up later. Completing the wizard
//! creates a client account and a pending project in one go.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use stackline_codec::{obfuscate, obfuscate_json, reveal_json};
use stackline_db::queries::projects::NewProject;
use stackline_db::queries::users::NewUser;
use stackline_types::api::{
    CompleteSignupRequest, SaveProgressRequest, SignupProgressResponse, SignupResponse,
};
use stackline_types::events::GatewayEvent;
use stackline_types::models::Role;

use crate::audit::{self, actions};
use crate::auth::{AppState, create_token, hash_password};
use crate::blocking;
use crate::convert::{parse_ts, project_response, user_response};
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::ClientMeta;
use crate::validation::{
    MAX_LINE_LEN, MAX_TEXT_LEN, normalize_email, sanitize_optional, sanitize_text,
    validate_email, validate_password, validate_phone, validate_required,
};

/// Upper bound on a serialized draft.
const MAX_DRAFT_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub email: String,
}

fn checked_email(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    validate_email(&email).map_err(|msg| ApiError::validation_field("email", msg))?;
    Ok(email)
}

pub async fn save_progress(
    State(state): State<AppState>,
    Json(req): Json<SaveProgressRequest>,
) -> Result<Json<SignupProgressResponse>, ApiError> {
    let email = checked_email(&req.email)?;
    if req.step < 1 {
        return Err(ApiError::validation_field("step", "Step must be at least 1"));
    }

    let stored = obfuscate_json(&req.data)?;
    if stored.len() > MAX_DRAFT_BYTES {
        return Err(ApiError::validation_field("data", "Draft is too large"));
    }

    let step = req.step;
    let row = blocking::run(&state, move |db| {
        db.save_signup_progress(&email, step, &stored, Utc::now())
    })
    .await?;

    Ok(Json(SignupProgressResponse {
        email: row.email,
        step: row.step,
        data: req.data,
        updated_at: parse_ts(&row.updated_at),
        expires_at: parse_ts(&row.expires_at),
    }))
}

pub async fn load_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<SignupProgressResponse>, ApiError> {
    let email = checked_email(&query.email)?;
    let row = blocking::run(&state, move |db| db.get_signup_progress(&email, Utc::now()))
        .await?
        .ok_or_else(|| ApiError::not_found("No saved signup progress"))?;

    Ok(Json(SignupProgressResponse {
        data: reveal_json(&row.data)?,
        email: row.email,
        step: row.step,
        updated_at: parse_ts(&row.updated_at),
        expires_at: parse_ts(&row.expires_at),
    }))
}

pub async fn clear_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<StatusCode, ApiError> {
    let email = checked_email(&query.email)?;
    blocking::run(&state, move |db| db.delete_signup_progress(&email)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_signup(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<CompleteSignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let name = sanitize_text(&req.name);
    let company = sanitize_optional(req.company.as_deref());
    let phone = sanitize_optional(req.phone.as_deref());
    let plan = sanitize_text(&req.plan);
    let notes = sanitize_optional(req.notes.as_deref());

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&email));
    errors.check("password", validate_password(&req.password));
    errors.check("name", validate_required("Name", &name, MAX_LINE_LEN));
    errors.check("plan", validate_required("Plan", &plan, MAX_LINE_LEN));
    if let Some(company) = &company {
        errors.check("company", validate_required("Company", company, MAX_LINE_LEN));
    }
    if let Some(phone) = &phone {
        errors.check("phone", validate_phone(phone));
    }
    if let Some(notes) = &notes {
        errors.check("notes", validate_required("Notes", notes, MAX_TEXT_LEN));
    }
    errors.finish()?;

    let password_hash = hash_password(req.password).await?;
    let user_id = Uuid::new_v4().to_string();
    let project_id = Uuid::new_v4().to_string();
    let stored_notes = notes.as_deref().map(obfuscate);

    let created = blocking::run(&state, move |db| {
        db.complete_signup(
            &NewUser {
                id: &user_id,
                email: &email,
                password_hash: Some(password_hash.as_str()),
                role: Role::Client,
                google_id: None,
                name: Some(name.as_str()),
                company: company.as_deref(),
                phone: phone.as_deref(),
            },
            &NewProject {
                id: &project_id,
                owner_id: &user_id,
                plan: &plan,
                notes: stored_notes.as_deref(),
                subscription_id: None,
            },
        )
    })
    .await?;

    let Some((user_row, project_row)) = created else {
        return Err(ApiError::conflict(
            "An account with this email already exists, please sign in",
        ));
    };

    let user = user_response(&user_row);
    let project = project_response(&project_row);
    let token = create_token(&state.jwt_secret, &user)?;

    info!("Signup completed for {} with plan {}", user.email, project.plan);
    audit::record(
        &state,
        Some(user.id),
        actions::SIGNUP_COMPLETE,
        serde_json::json!({ "project_id": project.id, "plan": project.plan }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::NewSignup {
        user: user.clone(),
        project: project.clone(),
    });

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user,
            token,
            project,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};
    use axum::http::Method;

    #[tokio::test]
    async fn draft_save_load_clear() {
        let app = TestApp::new();
        let draft = serde_json::json!({ "plan": "growth", "pages": ["home", "pricing"] });

        let resp = app
            .put(
                "/api/signup/progress",
                None,
                serde_json::json!({ "email": "Lead@Example.com", "step": 2, "data": draft }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = app
            .state
            .db
            .get_signup_progress("lead@example.com", Utc::now())
            .unwrap()
            .unwrap();
        assert!(!stored.data.contains("growth"));

        let resp = app.get("/api/signup/progress?email=lead@example.com", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["step"], 2);
        assert_eq!(body["data"], draft);

        let resp = app
            .request(Method::DELETE, "/api/signup/progress?email=lead@example.com", None, None)
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app.get("/api/signup/progress?email=lead@example.com", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn expired_draft_reads_as_missing() {
        let app = TestApp::new();
        let long_ago = Utc::now() - chrono::Duration::hours(73);
        app.state
            .db
            .save_signup_progress("late@example.com", 1, &obfuscate_json(&serde_json::json!({})).unwrap(), long_ago)
            .unwrap();

        let resp = app.get("/api/signup/progress?email=late@example.com", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_step_zero() {
        let app = TestApp::new();
        let resp = app
            .put(
                "/api/signup/progress",
                None,
                serde_json::json!({ "email": "lead@example.com", "step": 0, "data": {} }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn completion_creates_account_and_pending_project() {
        let app = TestApp::new();
        let mut rx = app.state.dispatcher.subscribe();
        app.put(
            "/api/signup/progress",
            None,
            serde_json::json!({ "email": "new@example.com", "step": 3, "data": {} }),
        )
        .await;

        let body = serde_json::json!({
            "email": "new@example.com",
            "password": "correct horse",
            "name": "New Client",
            "company": "Acme",
            "plan": "growth",
            "notes": "Need it by June"
        });
        let resp = app.post("/api/signup/complete", None, body.clone()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["user"]["role"], "client");
        assert_eq!(created["project"]["status"], "pending");
        assert_eq!(created["project"]["notes"], "Need it by June");
        assert_eq!(created["project"]["owner_id"], created["user"]["id"]);
        assert!(created["token"].is_string());

        assert_eq!(rx.recv().await.unwrap().name, "new_audit_log");
        assert_eq!(rx.recv().await.unwrap().name, "new_signup");

        // Draft is cleared
        let resp = app.get("/api/signup/progress?email=new@example.com", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.post("/api/signup/complete", None, body).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
