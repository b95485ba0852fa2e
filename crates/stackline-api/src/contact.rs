use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use stackline_codec::obfuscate;
use stackline_db::queries::messages::NewMessage;
use stackline_types::api::{Claims, ContactRequest, MessageResponse};
use stackline_types::events::GatewayEvent;
use stackline_types::models::MessageStatus;

use crate::auth::AppState;
use crate::blocking;
use crate::convert::message_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_admin};
use crate::validation::{
    MAX_LINE_LEN, MAX_TEXT_LEN, normalize_email, sanitize_optional, sanitize_text,
    validate_email, validate_phone, validate_required,
};

/// Public contact form. The message body is stored obfuscated together with
/// the requester's address and user agent.
pub async fn submit_contact(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(req): Json<ContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = sanitize_text(&req.name);
    let email = normalize_email(&req.email);
    let phone = sanitize_optional(req.phone.as_deref());
    let company = sanitize_optional(req.company.as_deref());
    let service = sanitize_optional(req.service.as_deref());
    let content = sanitize_text(&req.message);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_required("Name", &name, MAX_LINE_LEN));
    errors.check("email", validate_email(&email));
    errors.check("message", validate_required("Message", &content, MAX_TEXT_LEN));
    if let Some(phone) = &phone {
        errors.check("phone", validate_phone(phone));
    }
    if let Some(company) = &company {
        errors.check("company", validate_required("Company", company, MAX_LINE_LEN));
    }
    if let Some(service) = &service {
        errors.check("service", validate_required("Service", service, MAX_LINE_LEN));
    }
    errors.finish()?;

    let id = Uuid::new_v4().to_string();
    let stored_content = obfuscate(&content);
    let row = blocking::run(&state, move |db| {
        db.insert_message(&NewMessage {
            id: &id,
            name: &name,
            email: &email,
            phone: phone.as_deref(),
            company: company.as_deref(),
            service: service.as_deref(),
            content: &stored_content,
            ip_address: meta.ip.as_deref(),
            user_agent: meta.user_agent.as_deref(),
        })?;
        db.get_message(&id)
    })
    .await?
    .ok_or_else(|| ApiError::internal("contact message vanished after insert"))?;

    let message = message_response(&row);
    info!("New contact message {} from {}", message.id, message.email);
    state.dispatcher.broadcast(GatewayEvent::NewMessage {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub status: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    require_admin(&claims)?;

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<MessageStatus>()
                .map_err(|e| ApiError::validation_field("status", e.to_string()))?,
        ),
        None => None,
    };

    let rows = blocking::run(&state, move |db| db.list_messages(status)).await?;
    Ok(Json(rows.iter().map(message_response).collect()))
}
