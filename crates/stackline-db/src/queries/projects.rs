use anyhow::Result;
use rusqlite::{Connection, Row, params};
use stackline_types::models::ProjectStatus;

use super::OptionalExt;
use crate::Database;
use crate::models::ProjectRow;

const PROJECT_SELECT: &str = "SELECT p.id, p.owner_id, u.email, p.plan, p.status, p.notes,
        p.subscription_id, p.created_at, p.updated_at
     FROM projects p
     LEFT JOIN users u ON p.owner_id = u.id";

pub struct NewProject<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub plan: &'a str,
    /// Already obfuscated.
    pub notes: Option<&'a str>,
    pub subscription_id: Option<&'a str>,
}

/// Partial update; `None` leaves a column untouched.
#[derive(Default)]
pub struct ProjectChanges<'a> {
    pub status: Option<ProjectStatus>,
    /// Already obfuscated.
    pub notes: Option<&'a str>,
    pub plan: Option<&'a str>,
}

impl Database {
    pub fn create_project(&self, project: &NewProject<'_>) -> Result<()> {
        self.with_conn(|conn| insert_project(conn, project))
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        self.with_conn(|conn| query_project(conn, id))
    }

    /// All projects, or only those owned by `owner_id`. Newest first.
    pub fn list_projects(&self, owner_id: Option<&str>) -> Result<Vec<ProjectRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE ?1 IS NULL OR p.owner_id = ?1
                 ORDER BY p.created_at DESC, p.rowid DESC",
                PROJECT_SELECT
            ))?;
            let rows = stmt
                .query_map([owner_id], project_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_project(&self, id: &str, changes: &ProjectChanges<'_>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET
                    status = COALESCE(?2, status),
                    notes = COALESCE(?3, notes),
                    plan = COALESCE(?4, plan),
                    updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    id,
                    changes.status.map(|s| s.as_str()),
                    changes.notes,
                    changes.plan,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn delete_project(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            // Detach the subscription that produced it, if any
            conn.execute(
                "UPDATE subscriptions SET project_id = NULL WHERE project_id = ?1",
                [id],
            )?;
            let changed = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }
}

pub(crate) fn insert_project(conn: &Connection, project: &NewProject<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, owner_id, plan, status, notes, subscription_id)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
        params![
            project.id,
            project.owner_id,
            project.plan,
            project.notes,
            project.subscription_id,
        ],
    )?;
    Ok(())
}

pub(crate) fn query_project(conn: &Connection, id: &str) -> Result<Option<ProjectRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE p.id = ?1", PROJECT_SELECT))?;
    stmt.query_row([id], project_from_row).optional()
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_email: row.get(2)?,
        plan: row.get(3)?,
        status: row.get(4)?,
        notes: row.get(5)?,
        subscription_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
