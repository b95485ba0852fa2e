use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use stackline_db::queries::audit::AuditFilter;
use stackline_types::api::{AuditLogPage, Claims};
use stackline_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::blocking;
use crate::convert::audit_response;
use crate::error::ApiError;
use crate::middleware::require_admin;

/// Audit action names
pub mod actions {
    pub const USER_REGISTER: &str = "user.register";
    pub const USER_LOGIN: &str = "user.login";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_PASSWORD_CHANGE: &str = "user.password_change";
    pub const SIGNUP_COMPLETE: &str = "signup.complete";
    pub const PROJECT_UPDATE: &str = "project.update";
    pub const NOTIFICATION_CREATE: &str = "notification.create";
    pub const NOTIFICATION_DELETE: &str = "notification.delete";
    pub const TICKET_CREATE: &str = "ticket.create";
    pub const TICKET_CLOSE: &str = "ticket.close";
    pub const SUBSCRIPTION_REQUEST: &str = "subscription.request";
    pub const SUBSCRIPTION_APPROVE: &str = "subscription.approve";
    pub const SUBSCRIPTION_REJECT: &str = "subscription.reject";
    pub const SUBSCRIPTION_CANCEL: &str = "subscription.cancel";
    pub const SUBSCRIPTION_EXTEND: &str = "subscription.extend";
    pub const INVOICE_CREATE: &str = "invoice.create";
    pub const INVOICE_REQUEST: &str = "invoice.request";
    pub const INVOICE_SEND: &str = "invoice.send";
    pub const INVOICE_PAY: &str = "invoice.pay";
    pub const RESOURCE_UPDATE: &str = "resource.update";
    pub const RESOURCE_DELETE: &str = "resource.delete";
}

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 100;

/// Append an audit entry and announce it. A failure here is logged and
/// swallowed: auditing never fails the request that triggered it.
pub async fn record(
    state: &AppState,
    actor_id: Option<Uuid>,
    action: &'static str,
    detail: serde_json::Value,
    ip_address: Option<String>,
) {
    let id = Uuid::new_v4().to_string();
    let actor = actor_id.map(|a| a.to_string());
    let detail = detail.to_string();

    let result = blocking::run(state, move |db| {
        db.insert_audit_log(&id, actor.as_deref(), action, &detail, ip_address.as_deref())
    })
    .await;

    match result {
        Ok(row) => {
            state.dispatcher.broadcast(GatewayEvent::NewAuditLog {
                entry: audit_response(&row),
            });
        }
        Err(e) => warn!("Failed to record audit entry {}: {}", action, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Resolve `(page, per_page)`: page starts at 1, per_page is clamped to
/// `1..=MAX_PER_PAGE`.
fn pagination(page: Option<u32>, per_page: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditLogPage>, ApiError> {
    require_admin(&claims)?;

    let (page, per_page) = pagination(query.page, query.per_page);
    let filter = AuditFilter {
        action: query.action.filter(|a| !a.is_empty()),
        actor_id: query.actor_id.map(|a| a.to_string()),
    };
    let offset = (page - 1).saturating_mul(per_page);

    let (rows, total) =
        blocking::run(&state, move |db| db.list_audit_logs(&filter, per_page, offset)).await?;

    let total_pages = total.div_ceil(per_page as u64) as u32;

    Ok(Json(AuditLogPage {
        items: rows.iter().map(audit_response).collect(),
        total,
        page,
        per_page,
        total_pages,
    }))
}

pub async fn list_audit_actions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<String>>, ApiError> {
    require_admin(&claims)?;
    let actions = blocking::run(&state, |db| db.list_audit_actions()).await?;
    Ok(Json(actions))
}
