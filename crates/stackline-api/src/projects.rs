use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use stackline_codec::obfuscate;
use stackline_db::queries::projects::ProjectChanges;
use stackline_types::api::{Claims, ProjectResponse, UpdateProjectRequest};
use stackline_types::events::GatewayEvent;
use stackline_types::models::ProjectStatus;

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::project_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_owner_or_admin};
use crate::validation::{MAX_LINE_LEN, MAX_TEXT_LEN, sanitize_text, validate_required};

/// Clients see their own projects, admins see all of them.
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ProjectResponse>>, ApiError> {
    let owner = (!claims.is_admin()).then(|| claims.sub.to_string());
    let rows = blocking::run(&state, move |db| db.list_projects(owner.as_deref())).await?;
    Ok(Json(rows.iter().map(project_response).collect()))
}

/// Admins may change status, notes and plan. An owner may edit notes and
/// cancel, nothing else.
pub async fn update_project(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(project_id): Path<Uuid>,
    meta: ClientMeta,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    if req.status.is_none() && req.notes.is_none() && req.plan.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let id = project_id.to_string();
    let current = blocking::run(&state, move |db| db.get_project(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    require_owner_or_admin(&claims, &current.owner_id)?;

    if !claims.is_admin() {
        if req.plan.is_some() {
            return Err(ApiError::forbidden("Only an admin can change the plan"));
        }
        if req.status.is_some_and(|s| s != ProjectStatus::Cancelled) {
            return Err(ApiError::forbidden("Clients can only cancel a project"));
        }
    }

    let notes = req.notes.as_deref().map(sanitize_text);
    let plan = req.plan.as_deref().map(sanitize_text);

    let mut errors = ValidationErrorBuilder::new();
    if let Some(notes) = &notes {
        if notes.chars().count() > MAX_TEXT_LEN {
            errors.add("notes", format!("Notes are too long (max {} characters)", MAX_TEXT_LEN));
        }
    }
    if let Some(plan) = &plan {
        errors.check("plan", validate_required("Plan", plan, MAX_LINE_LEN));
    }
    errors.finish()?;

    let stored_notes = notes.as_deref().map(obfuscate);
    let status = req.status;
    let id = project_id.to_string();
    let row = blocking::run(&state, move |db| {
        let changed = db.update_project(
            &id,
            &ProjectChanges {
                status,
                notes: stored_notes.as_deref(),
                plan: plan.as_deref(),
            },
        )?;
        if !changed {
            return Ok(None);
        }
        db.get_project(&id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let project = project_response(&row);
    audit::record(
        &state,
        Some(claims.sub),
        actions::PROJECT_UPDATE,
        serde_json::json!({
            "project_id": project.id,
            "status": req.status,
            "notes_changed": req.notes.is_some(),
            "plan": req.plan,
        }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::ProjectUpdated {
        project: project.clone(),
    });

    Ok(Json(project))
}
