//! Generic admin update/delete over the resources the dashboard manages.
//!
//! The body names the resource kind; each kind accepts only its own status
//! vocabulary. Invoices additionally follow their lifecycle: `sent` only from
//! `requested`, `Paid` only from `sent`, and nothing ever leaves `Paid`.

use std::str::FromStr;

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::Serialize;
use uuid::Uuid;

use stackline_db::queries::invoices::InvoiceDeletion;
use stackline_db::queries::projects::ProjectChanges;
use stackline_types::api::{Claims, ResourceRef, ResourceUpdateRequest};
use stackline_types::events::GatewayEvent;
use stackline_types::models::{
    InvoiceStatus, MessageStatus, ProjectStatus, ResourceKind, TicketStatus,
};

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::{invoice_response, message_response, project_response};
use crate::error::ApiError;
use crate::middleware::{ClientMeta, require_admin};
use crate::tickets::load_ticket;

fn parse_field<T>(field: &'static str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| ApiError::validation_field(field, e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(ApiError::internal)
}

fn not_found(kind: ResourceKind) -> ApiError {
    ApiError::not_found(format!("No such {}", kind))
}

/// Set the status of one resource and return its new state.
pub async fn update_resource(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<ResourceUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&claims)?;

    let kind = parse_field::<ResourceKind>("resource", &req.resource)?;
    let id = req.id.to_string();

    let (updated, event) = match kind {
        ResourceKind::Message => {
            let status: MessageStatus = parse_field("status", &req.status)?;
            let row = blocking::run(&state, move |db| {
                if !db.update_message_status(&id, status)? {
                    return Ok(None);
                }
                db.get_message(&id)
            })
            .await?
            .ok_or_else(|| not_found(kind))?;
            (
                to_json(&message_response(&row))?,
                GatewayEvent::MessageUpdated { id: req.id, status },
            )
        }
        ResourceKind::Project => {
            let status: ProjectStatus = parse_field("status", &req.status)?;
            let row = blocking::run(&state, move |db| {
                let changes = ProjectChanges {
                    status: Some(status),
                    ..Default::default()
                };
                if !db.update_project(&id, &changes)? {
                    return Ok(None);
                }
                db.get_project(&id)
            })
            .await?
            .ok_or_else(|| not_found(kind))?;
            let project = project_response(&row);
            (to_json(&project)?, GatewayEvent::ProjectUpdated { project })
        }
        ResourceKind::Ticket => {
            let status: TicketStatus = parse_field("status", &req.status)?;
            let ticket = blocking::run(&state, move |db| {
                if !db.update_ticket_status(&id, status)? {
                    return Ok(None);
                }
                load_ticket(db, &id)
            })
            .await?
            .ok_or_else(|| not_found(kind))?;
            (to_json(&ticket)?, GatewayEvent::UpdateTickets { ticket })
        }
        ResourceKind::Invoice => {
            let status: InvoiceStatus = parse_field("status", &req.status)?;
            let lookup = id.clone();
            let current = blocking::run(&state, move |db| db.get_invoice(&lookup))
                .await?
                .ok_or_else(|| not_found(kind))?;

            // Each target status goes through its own lifecycle step
            let row = blocking::run(&state, move |db| {
                let moved = match status {
                    InvoiceStatus::Requested => false,
                    InvoiceStatus::Sent => db.send_invoice(&id, None, None)?,
                    InvoiceStatus::Paid => db.mark_invoice_paid(&id, chrono::Utc::now())?,
                    InvoiceStatus::Cancelled => db.cancel_invoice(&id)?,
                };
                if !moved {
                    return Ok(None);
                }
                db.get_invoice(&id)
            })
            .await?
            .ok_or_else(|| {
                ApiError::conflict(format!(
                    "Cannot move a {} invoice to {}",
                    current.status, status
                ))
            })?;

            let invoice = invoice_response(&row, chrono::Utc::now().date_naive());
            let event = if status == InvoiceStatus::Paid {
                GatewayEvent::InvoicePaid {
                    invoice: invoice.clone(),
                }
            } else {
                GatewayEvent::InvoiceUpdated {
                    invoice: invoice.clone(),
                }
            };
            (to_json(&invoice)?, event)
        }
    };

    audit::record(
        &state,
        Some(claims.sub),
        actions::RESOURCE_UPDATE,
        serde_json::json!({ "resource": kind, "id": req.id, "status": req.status }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(event);

    Ok(Json(updated))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<ResourceRef>,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;

    let kind = parse_field::<ResourceKind>("resource", &req.resource)?;
    let id = req.id.to_string();
    let target: Uuid = req.id;

    let event = match kind {
        ResourceKind::Message => {
            if !blocking::run(&state, move |db| db.delete_message(&id)).await? {
                return Err(not_found(kind));
            }
            GatewayEvent::MessageDeleted { id: target }
        }
        ResourceKind::Project => {
            if !blocking::run(&state, move |db| db.delete_project(&id)).await? {
                return Err(not_found(kind));
            }
            GatewayEvent::ProjectDeleted { id: target }
        }
        ResourceKind::Ticket => {
            if !blocking::run(&state, move |db| db.delete_ticket(&id)).await? {
                return Err(not_found(kind));
            }
            GatewayEvent::TicketDeleted { id: target }
        }
        ResourceKind::Invoice => {
            match blocking::run(&state, move |db| db.delete_invoice(&id)).await? {
                InvoiceDeletion::Deleted => GatewayEvent::InvoiceDeleted { id: target },
                InvoiceDeletion::Paid => {
                    return Err(ApiError::conflict("A paid invoice cannot be deleted"));
                }
                InvoiceDeletion::NotFound => return Err(not_found(kind)),
            }
        }
    };

    audit::record(
        &state,
        Some(claims.sub),
        actions::RESOURCE_DELETE,
        serde_json::json!({ "resource": kind, "id": target }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(event);

    Ok(StatusCode::NO_CONTENT)
}
