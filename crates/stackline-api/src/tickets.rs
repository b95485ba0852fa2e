use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use stackline_codec::obfuscate;
use stackline_db::Database;
use stackline_db::queries::tickets::{NewTicket, NewTicketResponse};
use stackline_types::api::{Claims, CreateTicketRequest, TicketReplyRequest, TicketResponse};
use stackline_types::events::GatewayEvent;
use stackline_types::models::TicketStatus;

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::ticket_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_owner_or_admin};
use crate::validation::{MAX_LINE_LEN, MAX_TEXT_LEN, sanitize_text, validate_required};

/// Load a ticket together with its thread.
pub(crate) fn load_ticket(db: &Database, id: &str) -> anyhow::Result<Option<TicketResponse>> {
    let Some(row) = db.get_ticket(id)? else {
        return Ok(None);
    };
    let replies = db.get_responses_for_tickets(&[row.id.clone()])?;
    Ok(Some(ticket_response(&row, &replies)))
}

async fn fetch_ticket(state: &AppState, ticket_id: Uuid) -> Result<TicketResponse, ApiError> {
    let id = ticket_id.to_string();
    blocking::run(state, move |db| load_ticket(db, &id))
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket not found"))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject = sanitize_text(&req.subject);
    let message = sanitize_text(&req.message);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("subject", validate_required("Subject", &subject, MAX_LINE_LEN));
    errors.check("message", validate_required("Message", &message, MAX_TEXT_LEN));
    errors.finish()?;

    let id = Uuid::new_v4().to_string();
    let user_id = claims.sub.to_string();
    let stored_message = obfuscate(&message);
    let priority = req.priority;
    let ticket = blocking::run(&state, move |db| {
        db.insert_ticket(&NewTicket {
            id: &id,
            user_id: &user_id,
            subject: &subject,
            message: &stored_message,
            priority,
        })?;
        load_ticket(db, &id)
    })
    .await?
    .ok_or_else(|| ApiError::internal("ticket vanished after insert"))?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::TICKET_CREATE,
        serde_json::json!({ "ticket_id": ticket.id, "priority": ticket.priority }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::UpdateTickets {
        ticket: ticket.clone(),
    });

    Ok((StatusCode::CREATED, Json(ticket)))
}

/// Clients see their own tickets, admins see all. Threads are included.
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<TicketResponse>>, ApiError> {
    let owner = (!claims.is_admin()).then(|| claims.sub.to_string());
    let tickets = blocking::run(&state, move |db| {
        let rows = db.list_tickets(owner.as_deref())?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let replies = db.get_responses_for_tickets(&ids)?;
        Ok(rows
            .iter()
            .map(|row| ticket_response(row, &replies))
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = fetch_ticket(&state, ticket_id).await?;
    require_owner_or_admin(&claims, &ticket.user_id.to_string())?;
    Ok(Json(ticket))
}

/// Append a reply. An admin reply marks the ticket answered, a client reply
/// reopens it. Closed tickets take no more replies.
pub async fn respond(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<TicketReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = sanitize_text(&req.message);
    validate_required("Message", &message, MAX_TEXT_LEN)
        .map_err(|msg| ApiError::validation_field("message", msg))?;

    let ticket = fetch_ticket(&state, ticket_id).await?;
    require_owner_or_admin(&claims, &ticket.user_id.to_string())?;
    if ticket.status == TicketStatus::Closed {
        return Err(ApiError::conflict("Ticket is closed"));
    }

    let next_status = if claims.is_admin() {
        TicketStatus::Answered
    } else {
        TicketStatus::Open
    };

    let response_id = Uuid::new_v4().to_string();
    let id = ticket_id.to_string();
    let sender_id = claims.sub.to_string();
    let sender_role = claims.role;
    let stored_message = obfuscate(&message);
    let ticket = blocking::run(&state, move |db| {
        let added = db.add_ticket_response(
            &NewTicketResponse {
                id: &response_id,
                ticket_id: &id,
                sender_role,
                sender_id: &sender_id,
                message: &stored_message,
            },
            next_status,
        )?;
        if !added {
            return Ok(None);
        }
        load_ticket(db, &id)
    })
    .await?
    // Closed (or deleted) since the check above
    .ok_or_else(|| ApiError::conflict("Ticket is closed"))?;

    state.dispatcher.broadcast(GatewayEvent::UpdateTickets {
        ticket: ticket.clone(),
    });

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn close_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = fetch_ticket(&state, ticket_id).await?;
    require_owner_or_admin(&claims, &ticket.user_id.to_string())?;
    if ticket.status == TicketStatus::Closed {
        return Ok(Json(ticket));
    }

    let id = ticket_id.to_string();
    let ticket = blocking::run(&state, move |db| {
        db.update_ticket_status(&id, TicketStatus::Closed)?;
        load_ticket(db, &id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Ticket not found"))?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::TICKET_CLOSE,
        serde_json::json!({ "ticket_id": ticket.id }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::UpdateTickets {
        ticket: ticket.clone(),
    });

    Ok(Json(ticket))
}
