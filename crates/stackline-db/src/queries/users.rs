use anyhow::Result;
use rusqlite::{Connection, Row, params};
use stackline_types::models::Role;
use tracing::info;

use super::OptionalExt;
use crate::Database;
use crate::models::UserRow;

const USER_COLUMNS: &str =
    "id, email, password_hash, role, google_id, name, company, phone, created_at, updated_at";

pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub role: Role,
    pub google_id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub company: Option<&'a str>,
    pub phone: Option<&'a str>,
}

impl Database {
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| insert_user(conn, user))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "google_id", google_id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Attach a Google identity to an existing account.
    pub fn link_google_id(&self, id: &str, google_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET google_id = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, google_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Overwrite the editable profile fields. Returns false for an unknown id.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        company: Option<&str>,
        phone: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = ?2, company = ?3, phone = ?4, updated_at = datetime('now')
                 WHERE id = ?1",
                params![id, name, company, phone],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, password_hash],
            )?;
            Ok(changed == 1)
        })
    }

    /// Make sure an admin account exists for `email`. An existing account is
    /// promoted and its password replaced; otherwise one is created.
    pub fn ensure_admin(&self, id: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = 'admin', password_hash = ?2, updated_at = datetime('now')
                 WHERE email = ?1",
                params![email, password_hash],
            )?;
            if changed == 0 {
                insert_user(
                    conn,
                    &NewUser {
                        id,
                        email,
                        password_hash: Some(password_hash),
                        role: Role::Admin,
                        google_id: None,
                        name: Some("Administrator"),
                        company: None,
                        phone: None,
                    },
                )?;
                info!("Seeded admin account {}", email);
            }
            Ok(())
        })
    }
}

pub(crate) fn insert_user(conn: &Connection, user: &NewUser<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, password_hash, role, google_id, name, company, phone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.id,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.google_id,
            user.name,
            user.company,
            user.phone,
        ],
    )?;
    Ok(())
}

pub(crate) fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    ))?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        google_id: row.get(4)?,
        name: row.get(5)?,
        company: row.get(6)?,
        phone: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
