use axum::{Extension, Json, extract::State, http::StatusCode};

use stackline_types::api::{ChangePasswordRequest, Claims, UpdateProfileRequest, UserResponse};
use stackline_types::events::GatewayEvent;

use crate::audit::{self, actions};
use crate::auth::{AppState, hash_password, verify_password};
use crate::blocking;
use crate::convert::user_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_admin};
use crate::validation::{
    MAX_LINE_LEN, sanitize_optional, validate_password, validate_phone, validate_required,
};

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = claims.sub.to_string();
    let row = blocking::run(&state, move |db| db.get_user_by_id(&user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user_response(&row)))
}

/// Replace name, company and phone. Omitted fields are cleared.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let name = sanitize_optional(req.name.as_deref());
    let company = sanitize_optional(req.company.as_deref());
    let phone = sanitize_optional(req.phone.as_deref());

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &name {
        errors.check("name", validate_required("Name", name, MAX_LINE_LEN));
    }
    if let Some(company) = &company {
        errors.check("company", validate_required("Company", company, MAX_LINE_LEN));
    }
    if let Some(phone) = &phone {
        errors.check("phone", validate_phone(phone));
    }
    errors.finish()?;

    let user_id = claims.sub.to_string();
    let row = blocking::run(&state, move |db| {
        if !db.update_profile(&user_id, name.as_deref(), company.as_deref(), phone.as_deref())? {
            return Ok(None);
        }
        db.get_user_by_id(&user_id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let user = user_response(&row);
    audit::record(
        &state,
        Some(claims.sub),
        actions::USER_UPDATE,
        serde_json::json!({ "fields": ["name", "company", "phone"] }),
        meta.ip,
    )
    .await;
    state
        .dispatcher
        .broadcast(GatewayEvent::UserUpdated { user: user.clone() });

    Ok(Json(user))
}

/// Set a new password. The current one is required whenever the account
/// already has a password; Google-only accounts may set a first one.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    validate_password(&req.new_password)
        .map_err(|msg| ApiError::validation_field("new_password", msg))?;

    let user_id = claims.sub.to_string();
    let row = blocking::run(&state, move |db| db.get_user_by_id(&user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(stored_hash) = row.password_hash.clone() {
        let current = req
            .current_password
            .ok_or_else(|| ApiError::validation_field("current_password", "Current password is required"))?;
        if !verify_password(current, stored_hash).await? {
            return Err(ApiError::unauthorized("Current password is incorrect"));
        }
    }

    let new_hash = hash_password(req.new_password).await?;
    let user_id = row.id.clone();
    blocking::run(&state, move |db| db.set_password_hash(&user_id, &new_hash)).await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::USER_PASSWORD_CHANGE,
        serde_json::json!({ "had_password": row.password_hash.is_some() }),
        meta.ip,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_admin(&claims)?;
    let rows = blocking::run(&state, |db| db.list_users()).await?;
    Ok(Json(rows.iter().map(user_response).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};

    #[tokio::test]
    async fn profile_roundtrip() {
        let app = TestApp::new();
        let (id, token) = app.client("jane@example.com");

        let resp = app.get("/api/me", Some(token.as_str())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let me = body_json(resp).await;
        assert_eq!(me["id"], id.to_string());
        assert_eq!(me["has_password"], false);

        let resp = app
            .put(
                "/api/me",
                Some(token.as_str()),
                serde_json::json!({ "name": " Jane <b>Doe</b> ", "company": "Acme", "phone": "+1 555 0100" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let me = body_json(resp).await;
        assert_eq!(me["name"], "Jane Doe");
        assert_eq!(me["company"], "Acme");

        let resp = app
            .put("/api/me", Some(token.as_str()), serde_json::json!({ "phone": "not a phone" }))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn password_change_requires_current_once_set() {
        let app = TestApp::new();
        let (_, token) = app.client("jane@example.com");

        // No password yet: a first one can be set without the current
        let resp = app
            .put("/api/me/password", Some(token.as_str()), serde_json::json!({ "new_password": "first-password" }))
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .put("/api/me/password", Some(token.as_str()), serde_json::json!({ "new_password": "second-password" }))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .put(
                "/api/me/password",
                Some(token.as_str()),
                serde_json::json!({ "current_password": "wrong-password", "new_password": "second-password" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .put(
                "/api/me/password",
                Some(token.as_str()),
                serde_json::json!({ "current_password": "first-password", "new_password": "second-password" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn listing_users_is_admin_only() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, client) = app.client("jane@example.com");

        assert_eq!(app.get("/api/admin/users", None).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            app.get("/api/admin/users", Some(client.as_str())).await.status(),
            StatusCode::FORBIDDEN
        );

        let resp = app.get("/api/admin/users", Some(admin.as_str())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
    }
}
