use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use stackline_db::Database;
use stackline_db::queries::users::NewUser;
use stackline_gateway::dispatcher::Dispatcher;
use stackline_types::api::{
    AuthResponse, Claims, GoogleLoginRequest, LoginRequest, RegisterRequest, UserResponse,
};
use stackline_types::events::GatewayEvent;
use stackline_types::models::Role;

use crate::audit::{self, actions};
use crate::blocking;
use crate::convert::user_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::google::GoogleVerifier;
use crate::middleware::ClientMeta;
use crate::validation::{
    MAX_LINE_LEN, normalize_email, sanitize_optional, validate_email, validate_password,
    validate_required,
};

/// Session tokens stay valid for a week.
pub const TOKEN_TTL_DAYS: i64 = 7;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// `None` when GOOGLE_CLIENT_ID is not configured.
    pub google: Option<GoogleVerifier>,
}

pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let name = sanitize_optional(req.name.as_deref());

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&email));
    errors.check("password", validate_password(&req.password));
    if let Some(name) = &name {
        errors.check("name", validate_required("Name", name, MAX_LINE_LEN));
    }
    errors.finish()?;

    let password_hash = hash_password(req.password).await?;
    let user_id = Uuid::new_v4().to_string();

    // Registration always yields a client; admins are seeded from config
    let created = blocking::run(&state, move |db| {
        if db.get_user_by_email(&email)?.is_some() {
            return Ok(None);
        }
        db.create_user(&NewUser {
            id: &user_id,
            email: &email,
            password_hash: Some(password_hash.as_str()),
            role: Role::Client,
            google_id: None,
            name: name.as_deref(),
            company: None,
            phone: None,
        })?;
        db.get_user_by_id(&user_id)
    })
    .await?;

    let user = created
        .map(|row| user_response(&row))
        .ok_or_else(|| ApiError::conflict("An account with this email already exists"))?;
    let token = create_token(&state.jwt_secret, &user)?;

    info!("Registered {} ({})", user.email, user.id);
    audit::record(
        &state,
        Some(user.id),
        actions::USER_REGISTER,
        serde_json::json!({ "email": user.email, "provider": "password" }),
        meta.ip,
    )
    .await;
    state
        .dispatcher
        .broadcast(GatewayEvent::UserRegistered { user: user.clone() });

    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&req.email);
    let row = blocking::run(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid_credentials)?;

    // Google-only accounts have no password to check against
    let stored_hash = row.password_hash.clone().ok_or_else(invalid_credentials)?;
    if !verify_password(req.password, stored_hash).await? {
        return Err(invalid_credentials());
    }

    let user = user_response(&row);
    let token = create_token(&state.jwt_secret, &user)?;

    audit::record(
        &state,
        Some(user.id),
        actions::USER_LOGIN,
        serde_json::json!({ "provider": "password" }),
        meta.ip,
    )
    .await;

    Ok(Json(AuthResponse { user, token }))
}

/// Sign in with a Google ID token. The account is found by Google id, then by
/// email (and linked), and created as a client otherwise.
pub async fn google_login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<GoogleLoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let verifier = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Google sign-in is not configured"))?;

    if req.credential.trim().is_empty() {
        return Err(ApiError::validation_field("credential", "Credential is required"));
    }
    let identity = verifier.verify(req.credential.trim()).await?;

    let new_id = Uuid::new_v4().to_string();
    let (row, created) = blocking::run(&state, move |db| {
        if let Some(row) = db.get_user_by_google_id(&identity.google_id)? {
            return Ok((Some(row), false));
        }
        if let Some(row) = db.get_user_by_email(&identity.email)? {
            db.link_google_id(&row.id, &identity.google_id)?;
            return Ok((db.get_user_by_id(&row.id)?, false));
        }
        db.create_user(&NewUser {
            id: &new_id,
            email: &identity.email,
            password_hash: None,
            role: Role::Client,
            google_id: Some(identity.google_id.as_str()),
            name: identity.name.as_deref(),
            company: None,
            phone: None,
        })?;
        Ok((db.get_user_by_id(&new_id)?, true))
    })
    .await?;

    let user = row
        .map(|row| user_response(&row))
        .ok_or_else(|| ApiError::internal("user vanished during Google sign-in"))?;
    let token = create_token(&state.jwt_secret, &user)?;

    if created {
        info!("Registered {} ({}) via Google", user.email, user.id);
        audit::record(
            &state,
            Some(user.id),
            actions::USER_REGISTER,
            serde_json::json!({ "email": user.email, "provider": "google" }),
            meta.ip.clone(),
        )
        .await;
        state
            .dispatcher
            .broadcast(GatewayEvent::UserRegistered { user: user.clone() });
    }
    audit::record(
        &state,
        Some(user.id),
        actions::USER_LOGIN,
        serde_json::json!({ "provider": "google" }),
        meta.ip,
    )
    .await;

    Ok(Json(AuthResponse { user, token }))
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid email or password")
}

/// Hash with Argon2id on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await?
    .map_err(ApiError::internal)
}

pub async fn verify_password(password: String, stored_hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || -> Result<bool, argon2::password_hash::Error> {
        let parsed = PasswordHash::new(&stored_hash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
    .map_err(ApiError::internal)
}

pub fn create_token(secret: &str, user: &UserResponse) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal)
}
