//! Subscription lifecycle.
//!
//! ```text
//! pending  -> active | rejected | cancelled
//! active   -> extended | cancelled
//! extended -> extended | cancelled
//! ```
//!
//! Approval is the only way a subscription turns into a project. Every other
//! move is a compare-and-set on the current status, so two admins acting on
//! the same row cannot both win.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use stackline_db::models::SubscriptionRow;
use stackline_types::api::{
    ApprovalResponse, Claims, ExtendSubscriptionRequest, SubscriptionRequest,
    SubscriptionResponse,
};
use stackline_types::events::GatewayEvent;
use stackline_types::models::SubscriptionStatus;

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::{
    notification_response, parse_ts, project_response, subscription_response,
};
use crate::error::ApiError;
use crate::middleware::{ClientMeta, require_admin, require_owner_or_admin};
use crate::validation::{MAX_LINE_LEN, sanitize_text, validate_required};

pub const MAX_EXTEND_PERIODS: u32 = 24;

async fn load(state: &AppState, subscription_id: Uuid) -> Result<SubscriptionRow, ApiError> {
    let id = subscription_id.to_string();
    blocking::run(state, move |db| db.get_subscription(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Subscription not found"))
}

fn current_status(row: &SubscriptionRow) -> Result<SubscriptionStatus, ApiError> {
    row.status
        .parse()
        .map_err(|e| ApiError::internal(format!("subscription {}: {}", row.id, e)))
}

fn check_transition(
    current: SubscriptionStatus,
    next: SubscriptionStatus,
) -> Result<(), ApiError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(ApiError::conflict(format!(
            "Cannot move a {} subscription to {}",
            current, next
        )))
    }
}

/// Compare-and-set `expected -> next` and return the updated row. The
/// caller audits and broadcasts.
async fn apply_transition(
    state: &AppState,
    subscription_id: Uuid,
    expected: SubscriptionStatus,
    next: SubscriptionStatus,
    end_date: Option<chrono::DateTime<Utc>>,
) -> Result<SubscriptionResponse, ApiError> {
    let id = subscription_id.to_string();
    let row = blocking::run(state, move |db| {
        if !db.transition_subscription(&id, expected, next, end_date)? {
            return Ok(None);
        }
        db.get_subscription(&id)
    })
    .await?
    .ok_or_else(|| ApiError::conflict("Subscription was changed by someone else, reload and retry"))?;

    Ok(subscription_response(&row))
}

pub async fn request_subscription(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = sanitize_text(&req.plan);
    validate_required("Plan", &plan, MAX_LINE_LEN)
        .map_err(|msg| ApiError::validation_field("plan", msg))?;

    let id = Uuid::new_v4().to_string();
    let user_id = claims.sub.to_string();
    let cycle = req.billing_cycle;
    let row = blocking::run(&state, move |db| {
        db.insert_subscription(&id, &user_id, &plan, cycle)?;
        db.get_subscription(&id)
    })
    .await?
    .ok_or_else(|| ApiError::internal("subscription vanished after insert"))?;

    let subscription = subscription_response(&row);
    audit::record(
        &state,
        Some(claims.sub),
        actions::SUBSCRIPTION_REQUEST,
        serde_json::json!({
            "subscription_id": subscription.id,
            "plan": subscription.plan,
            "billing_cycle": subscription.billing_cycle,
        }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::SubscriptionUpdated {
        subscription: subscription.clone(),
    });

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<SubscriptionResponse>>, ApiError> {
    let owner = (!claims.is_admin()).then(|| claims.sub.to_string());
    let rows = blocking::run(&state, move |db| db.list_subscriptions(owner.as_deref())).await?;
    Ok(Json(rows.iter().map(subscription_response).collect()))
}

/// Activate a pending subscription: set its billing window, create the
/// project and tell the owner.
pub async fn approve(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subscription_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<Json<ApprovalResponse>, ApiError> {
    require_admin(&claims)?;

    let current = load(&state, subscription_id).await?;
    check_transition(current_status(&current)?, SubscriptionStatus::Active)?;
    let cycle = subscription_response(&current).billing_cycle;

    let start = Utc::now();
    let end = start + Duration::days(cycle.period_days());
    let id = subscription_id.to_string();
    let project_id = Uuid::new_v4().to_string();
    let (subscription_row, project_row) = blocking::run(&state, move |db| {
        db.approve_subscription(&id, start, end, &project_id, None)
    })
    .await?
    .ok_or_else(|| ApiError::conflict("Subscription is no longer pending"))?;

    let subscription = subscription_response(&subscription_row);
    let project = project_response(&project_row);
    info!(
        "Approved subscription {} for {}, project {}",
        subscription.id, subscription.user_id, project.id
    );

    // Let the owner know on their dashboard
    let notification_id = Uuid::new_v4().to_string();
    let owner_id = subscription_row.user_id.clone();
    let body = format!(
        "Your {} plan is active until {}.",
        subscription.plan,
        subscription
            .end_date
            .unwrap_or_else(|| parse_ts(&subscription_row.updated_at))
            .format("%Y-%m-%d")
    );
    let notification = blocking::run(&state, move |db| {
        db.insert_notification(&notification_id, "Subscription approved", &body, Some(&owner_id))?;
        db.get_notification(&notification_id)
    })
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::SUBSCRIPTION_APPROVE,
        serde_json::json!({ "subscription_id": subscription.id, "project_id": project.id }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::SubscriptionUpdated {
        subscription: subscription.clone(),
    });
    state.dispatcher.broadcast(GatewayEvent::ProjectCreated {
        project: project.clone(),
    });
    if let Some(row) = notification {
        state.dispatcher.broadcast(GatewayEvent::NewNotification {
            notification: notification_response(&row, None),
        });
    }

    Ok(Json(ApprovalResponse {
        subscription,
        project,
    }))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subscription_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_admin(&claims)?;

    let current = load(&state, subscription_id).await?;
    let status = current_status(&current)?;
    check_transition(status, SubscriptionStatus::Rejected)?;

    let subscription = apply_transition(
        &state,
        subscription_id,
        status,
        SubscriptionStatus::Rejected,
        None,
    )
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::SUBSCRIPTION_REJECT,
        serde_json::json!({ "subscription_id": subscription.id }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::SubscriptionUpdated {
        subscription: subscription.clone(),
    });

    Ok(Json(subscription))
}

/// Owner or admin. Allowed from any non-terminal state.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subscription_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let current = load(&state, subscription_id).await?;
    require_owner_or_admin(&claims, &current.user_id)?;

    let status = current_status(&current)?;
    check_transition(status, SubscriptionStatus::Cancelled)?;

    let subscription = apply_transition(
        &state,
        subscription_id,
        status,
        SubscriptionStatus::Cancelled,
        None,
    )
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::SUBSCRIPTION_CANCEL,
        serde_json::json!({ "subscription_id": subscription.id, "from": status }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::SubscriptionUpdated {
        subscription: subscription.clone(),
    });

    Ok(Json(subscription))
}

/// Push the end date out by `periods` billing cycles (default one).
pub async fn extend(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(subscription_id): Path<Uuid>,
    meta: ClientMeta,
    body: Option<Json<ExtendSubscriptionRequest>>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_admin(&claims)?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let periods = req.periods.unwrap_or(1);
    if !(1..=MAX_EXTEND_PERIODS).contains(&periods) {
        return Err(ApiError::validation_field(
            "periods",
            format!("Periods must be between 1 and {}", MAX_EXTEND_PERIODS),
        ));
    }

    let current = load(&state, subscription_id).await?;
    let status = current_status(&current)?;
    check_transition(status, SubscriptionStatus::Extended)?;

    let existing = subscription_response(&current);
    let now = Utc::now();
    // An already lapsed window restarts from today
    let base = existing.end_date.filter(|end| *end > now).unwrap_or(now);
    let new_end = base + Duration::days(existing.billing_cycle.period_days() * periods as i64);

    let subscription = apply_transition(
        &state,
        subscription_id,
        status,
        SubscriptionStatus::Extended,
        Some(new_end),
    )
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::SUBSCRIPTION_EXTEND,
        serde_json::json!({ "subscription_id": subscription.id, "periods": periods }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::SubscriptionUpdated {
        subscription: subscription.clone(),
    });

    Ok(Json(subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};
    use axum::http::Method;

    async fn request(app: &TestApp, token: &str, cycle: &str) -> String {
        let resp = app
            .post(
                "/api/subscriptions",
                Some(token),
                serde_json::json!({ "plan": "growth", "billing_cycle": cycle }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "pending");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn approval_creates_exactly_one_project() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let id = request(&app, &jane, "yearly").await;
        let uri = format!("/api/admin/subscriptions/{}/approve", id);

        let resp = app.request(Method::POST, &uri, Some(jane.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app.request(Method::POST, &uri, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["subscription"]["status"], "active");
        assert_eq!(body["project"]["status"], "pending");
        assert_eq!(body["project"]["plan"], "growth");
        assert_eq!(body["subscription"]["project_id"], body["project"]["id"]);

        let start = chrono::DateTime::parse_from_rfc3339(body["subscription"]["start_date"].as_str().unwrap()).unwrap();
        let end = chrono::DateTime::parse_from_rfc3339(body["subscription"]["end_date"].as_str().unwrap()).unwrap();
        assert_eq!((end - start).num_days(), 365);

        // Second approval is an illegal transition
        let resp = app.request(Method::POST, &uri, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let projects = body_json(app.get("/api/projects", Some(jane.as_str())).await).await;
        assert_eq!(projects.as_array().unwrap().len(), 1);

        // The owner got a targeted notification
        let notes = body_json(app.get("/api/notifications", Some(jane.as_str())).await).await;
        assert_eq!(notes[0]["title"], "Subscription approved");
        assert_eq!(notes[0]["target"], "user");
    }

    #[tokio::test]
    async fn transitions_outside_the_table_are_rejected() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let id = request(&app, &jane, "monthly").await;

        // Pending cannot be extended
        let resp = app
            .request(Method::POST, &format!("/api/admin/subscriptions/{}/extend", id), Some(admin.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .request(Method::POST, &format!("/api/admin/subscriptions/{}/reject", id), Some(admin.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "rejected");

        // Rejected is terminal
        for action in ["approve", "reject", "extend"] {
            let resp = app
                .request(
                    Method::POST,
                    &format!("/api/admin/subscriptions/{}/{}", id, action),
                    Some(admin.as_str()),
                    None,
                )
                .await;
            assert_eq!(resp.status(), StatusCode::CONFLICT, "{}", action);
        }
        let resp = app
            .request(Method::POST, &format!("/api/subscriptions/{}/cancel", id), Some(jane.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn extend_pushes_end_date_by_whole_periods() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let id = request(&app, &jane, "monthly").await;
        let approved = body_json(
            app.request(
                Method::POST,
                &format!("/api/admin/subscriptions/{}/approve", id),
                Some(admin.as_str()),
                None,
            )
            .await,
        )
        .await;
        let end = chrono::DateTime::parse_from_rfc3339(
            approved["subscription"]["end_date"].as_str().unwrap(),
        )
        .unwrap();

        let uri = format!("/api/admin/subscriptions/{}/extend", id);
        let resp = app
            .post(&uri, Some(admin.as_str()), serde_json::json!({ "periods": 25 }))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .post(&uri, Some(admin.as_str()), serde_json::json!({ "periods": 2 }))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "extended");
        let new_end = chrono::DateTime::parse_from_rfc3339(body["end_date"].as_str().unwrap()).unwrap();
        assert_eq!((new_end - end).num_days(), 60);

        // Extended may be extended again, without a body
        let resp = app.request(Method::POST, &uri, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .request(Method::POST, &format!("/api/subscriptions/{}/cancel", id), Some(jane.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "cancelled");
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_cancel() {
        let app = TestApp::new();
        let (_, jane) = app.client("jane@example.com");
        let (_, sam) = app.client("sam@example.com");
        let id = request(&app, &jane, "monthly").await;

        let uri = format!("/api/subscriptions/{}/cancel", id);
        let resp = app.request(Method::POST, &uri, Some(sam.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let mine = body_json(app.get("/api/subscriptions", Some(sam.as_str())).await).await;
        assert!(mine.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_entry_precedes_the_status_event() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let id = request(&app, &jane, "monthly").await;

        let mut rx = app.state.dispatcher.subscribe();
        let resp = app
            .request(Method::POST, &format!("/api/admin/subscriptions/{}/reject", id), Some(admin.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap().name, "new_audit_log");
        assert_eq!(rx.recv().await.unwrap().name, "subscription_updated");
        assert!(rx.try_recv().is_err());

        let id = request(&app, &jane, "monthly").await;
        let mut rx = app.state.dispatcher.subscribe();
        app.request(Method::POST, &format!("/api/subscriptions/{}/cancel", id), Some(jane.as_str()), None)
            .await;
        assert_eq!(rx.recv().await.unwrap().name, "new_audit_log");
        assert_eq!(rx.recv().await.unwrap().name, "subscription_updated");
    }
}
