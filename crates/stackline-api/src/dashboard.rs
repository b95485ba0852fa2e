use axum::{Extension, Json, extract::State};

use stackline_types::api::{Claims, DashboardStats};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::middleware::require_admin;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Headline counts for the admin dashboard.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DashboardStats>, ApiError> {
    require_admin(&claims)?;

    let counts = blocking::run(&state, |db| db.dashboard_counts()).await?;
    let online = state.dispatcher.connected().await as u64;

    Ok(Json(DashboardStats {
        users: counts.users,
        unread_messages: counts.unread_messages,
        open_tickets: counts.open_tickets,
        pending_subscriptions: counts.pending_subscriptions,
        unpaid_invoices: counts.unpaid_invoices,
        online_connections: online,
    }))
}
