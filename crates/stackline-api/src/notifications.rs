//! Dashboard notifications.
//!
//! A notification either targets one user or is a broadcast to everybody.
//! Targeted rows carry a single read flag; broadcast rows keep the list of
//! users who have read them, so read state is per user.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use stackline_db::queries::notifications::ReadOutcome;
use stackline_types::api::{
    Claims, CreateNotificationRequest, NotificationResponse, UnreadCountResponse,
};
use stackline_types::events::GatewayEvent;

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::{notification_response, parse_id};
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_admin};
use crate::validation::{MAX_LINE_LEN, MAX_TEXT_LEN, sanitize_text, validate_required};

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let viewer = claims.sub.to_string();
    let user_id = viewer.clone();
    let rows = blocking::run(&state, move |db| db.list_notifications_for(&user_id)).await?;

    Ok(Json(
        rows.iter()
            .map(|row| notification_response(row, Some(viewer.as_str())))
            .collect(),
    ))
}

pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let title = sanitize_text(&req.title);
    let body = sanitize_text(&req.body);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_required("Title", &title, MAX_LINE_LEN));
    errors.check("body", validate_required("Body", &body, MAX_TEXT_LEN));
    errors.finish()?;

    let id = Uuid::new_v4().to_string();
    let target_user = req.user_id.map(|u| u.to_string());
    let row = blocking::run(&state, move |db| {
        if let Some(user_id) = &target_user {
            if db.get_user_by_id(user_id)?.is_none() {
                return Ok(Err(ApiError::validation_field("user_id", "Unknown user")));
            }
        }
        db.insert_notification(&id, &title, &body, target_user.as_deref())?;
        Ok(db
            .get_notification(&id)?
            .ok_or_else(|| ApiError::internal("notification vanished after insert")))
    })
    .await??;

    let notification = notification_response(&row, None);
    audit::record(
        &state,
        Some(claims.sub),
        actions::NOTIFICATION_CREATE,
        serde_json::json!({
            "notification_id": notification.id,
            "target": notification.target,
            "user_id": notification.user_id,
        }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::NewNotification {
        notification: notification.clone(),
    });

    Ok((StatusCode::CREATED, Json(notification)))
}

/// Mark one notification read for the caller. Repeating it is a no-op.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let id = notification_id.to_string();
    let user_id = claims.sub.to_string();
    let outcome = blocking::run(&state, move |db| db.mark_notification_read(&id, &user_id)).await?;

    match outcome {
        ReadOutcome::Marked => {
            state.dispatcher.broadcast(GatewayEvent::NotificationRead {
                id: notification_id,
                user_id: claims.sub,
            });
            Ok(StatusCode::NO_CONTENT)
        }
        ReadOutcome::AlreadyRead => Ok(StatusCode::NO_CONTENT),
        ReadOutcome::NotRecipient => Err(ApiError::forbidden(
            "This notification is addressed to another user",
        )),
        ReadOutcome::NotFound => Err(ApiError::not_found("Notification not found")),
    }
}

/// Mark everything read for the caller, with one `notification_read` event
/// per notification that changed.
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = claims.sub.to_string();
    let marked = blocking::run(&state, move |db| db.mark_all_notifications_read(&user_id)).await?;

    for id in &marked {
        state.dispatcher.broadcast(GatewayEvent::NotificationRead {
            id: parse_id(id),
            user_id: claims.sub,
        });
    }
    Ok(Json(serde_json::json!({ "marked": marked.len() })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let viewer = claims.sub.to_string();
    let user_id = viewer.clone();
    let rows = blocking::run(&state, move |db| db.list_notifications_for(&user_id)).await?;

    let count = rows.iter().filter(|row| !row.is_read_by(&viewer)).count() as u64;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;

    let id = notification_id.to_string();
    if !blocking::run(&state, move |db| db.delete_notification(&id)).await? {
        return Err(ApiError::not_found("Notification not found"));
    }

    audit::record(
        &state,
        Some(claims.sub),
        actions::NOTIFICATION_DELETE,
        serde_json::json!({ "notification_id": notification_id }),
        meta.ip,
    )
    .await;
    state
        .dispatcher
        .broadcast(GatewayEvent::NotificationDeleted { id: notification_id });

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};
    use axum::http::Method;

    async fn unread(app: &TestApp, token: &str) -> u64 {
        let resp = app.get("/api/notifications/unread-count", Some(token)).await;
        body_json(resp).await["count"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn broadcast_read_state_is_per_user_and_idempotent() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let (_, sam) = app.client("sam@example.com");

        let resp = app
            .post(
                "/api/admin/notifications",
                Some(admin.as_str()),
                serde_json::json!({ "title": "Maintenance", "body": "Tonight at 22:00" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["target"], "all");
        let uri = format!("/api/notifications/{}/read", created["id"].as_str().unwrap());

        assert_eq!(unread(&app, &jane).await, 1);
        assert_eq!(unread(&app, &sam).await, 1);

        let mut rx = app.state.dispatcher.subscribe();
        let resp = app.request(Method::POST, &uri, Some(jane.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(rx.recv().await.unwrap().name, "notification_read");

        // Second read is accepted but changes nothing
        let resp = app.request(Method::POST, &uri, Some(jane.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_err());

        assert_eq!(unread(&app, &jane).await, 0);
        assert_eq!(unread(&app, &sam).await, 1);

        let listed = body_json(app.get("/api/notifications", Some(jane.as_str())).await).await;
        assert_eq!(listed[0]["read"], true);
        let listed = body_json(app.get("/api/notifications", Some(sam.as_str())).await).await;
        assert_eq!(listed[0]["read"], false);
    }

    #[tokio::test]
    async fn targeted_notification_is_private() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (jane_id, jane) = app.client("jane@example.com");
        let (_, sam) = app.client("sam@example.com");

        let created = body_json(
            app.post(
                "/api/admin/notifications",
                Some(admin.as_str()),
                serde_json::json!({ "title": "Invoice ready", "body": "See billing", "user_id": jane_id }),
            )
            .await,
        )
        .await;
        assert_eq!(created["target"], "user");
        let uri = format!("/api/notifications/{}/read", created["id"].as_str().unwrap());

        assert!(body_json(app.get("/api/notifications", Some(sam.as_str())).await).await
            .as_array()
            .unwrap()
            .is_empty());

        let resp = app.request(Method::POST, &uri, Some(sam.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .request(Method::POST, "/api/notifications/read-all", Some(jane.as_str()), None)
            .await;
        assert_eq!(body_json(resp).await["marked"], 1);
        assert_eq!(unread(&app, &jane).await, 0);

        let resp = app
            .request(Method::POST, "/api/notifications/read-all", Some(jane.as_str()), None)
            .await;
        assert_eq!(body_json(resp).await["marked"], 0);
    }

    #[tokio::test]
    async fn admin_only_create_and_delete() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");

        let resp = app
            .post(
                "/api/admin/notifications",
                Some(jane.as_str()),
                serde_json::json!({ "title": "Hi", "body": "there" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .post(
                "/api/admin/notifications",
                Some(admin.as_str()),
                serde_json::json!({ "title": "Hi", "body": "there", "user_id": Uuid::new_v4() }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let created = body_json(
            app.post(
                "/api/admin/notifications",
                Some(admin.as_str()),
                serde_json::json!({ "title": "Hi", "body": "there" }),
            )
            .await,
        )
        .await;
        let uri = format!("/api/admin/notifications/{}", created["id"].as_str().unwrap());

        let resp = app.request(Method::DELETE, &uri, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = app.request(Method::DELETE, &uri, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn read_all_announces_each_change() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (jane_id, jane) = app.client("jane@example.com");

        let mut ids = Vec::new();
        for title in ["First", "Second"] {
            let created = body_json(
                app.post(
                    "/api/admin/notifications",
                    Some(admin.as_str()),
                    serde_json::json!({ "title": title, "body": "Details inside" }),
                )
                .await,
            )
            .await;
            ids.push(created["id"].as_str().unwrap().to_string());
        }

        let mut rx = app.state.dispatcher.subscribe();
        let resp = app
            .request(Method::POST, "/api/notifications/read-all", Some(jane.as_str()), None)
            .await;
        assert_eq!(body_json(resp).await["marked"], 2);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.name, "notification_read");
            let payload: serde_json::Value = serde_json::from_str(&frame.json).unwrap();
            assert_eq!(payload["data"]["user_id"], jane_id.to_string());
            seen.push(payload["data"]["id"].as_str().unwrap().to_string());
        }
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
        assert!(rx.try_recv().is_err());
    }
}
