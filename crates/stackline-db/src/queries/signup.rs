use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::debug;

use super::OptionalExt;
use super::projects::{NewProject, insert_project, query_project};
use super::users::{NewUser, insert_user, query_user};
use crate::Database;
use crate::models::{ProjectRow, SignupProgressRow, UserRow, to_db_timestamp};

/// How long a saved wizard draft stays readable.
pub const SIGNUP_PROGRESS_TTL_HOURS: i64 = 72;

impl Database {
    /// Insert or replace the draft for `email`, restarting its expiry window.
    pub fn save_signup_progress(
        &self,
        email: &str,
        step: u32,
        data: &str,
        now: DateTime<Utc>,
    ) -> Result<SignupProgressRow> {
        let updated_at = to_db_timestamp(now);
        let expires_at = to_db_timestamp(now + Duration::hours(SIGNUP_PROGRESS_TTL_HOURS));

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signup_progress (email, step, data, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO UPDATE SET
                    step = excluded.step,
                    data = excluded.data,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at",
                params![email, step, data, updated_at, expires_at],
            )?;
            Ok(())
        })?;

        Ok(SignupProgressRow {
            email: email.to_string(),
            step,
            data: data.to_string(),
            updated_at,
            expires_at,
        })
    }

    /// Fetch the draft for `email`. A draft past its expiry is removed and
    /// reported as missing.
    pub fn get_signup_progress(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SignupProgressRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT email, step, data, updated_at, expires_at
                     FROM signup_progress WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(SignupProgressRow {
                            email: row.get(0)?,
                            step: row.get(1)?,
                            data: row.get(2)?,
                            updated_at: row.get(3)?,
                            expires_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;

            match row {
                Some(row) if row.expires_at <= to_db_timestamp(now) => {
                    debug!("Signup draft for {} expired at {}", row.email, row.expires_at);
                    conn.execute("DELETE FROM signup_progress WHERE email = ?1", [email])?;
                    Ok(None)
                }
                other => Ok(other),
            }
        })
    }

    pub fn delete_signup_progress(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM signup_progress WHERE email = ?1", [email])?;
            Ok(changed == 1)
        })
    }

    /// Create the account and its first project and drop the wizard draft,
    /// all in one transaction. Returns `None` if the email is already taken;
    /// nothing is written in that case or when any step fails.
    pub fn complete_signup(
        &self,
        user: &NewUser<'_>,
        project: &NewProject<'_>,
    ) -> Result<Option<(UserRow, ProjectRow)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if query_user(&tx, "email", user.email)?.is_some() {
                return Ok(None);
            }
            insert_user(&tx, user)?;
            insert_project(&tx, project)?;
            tx.execute("DELETE FROM signup_progress WHERE email = ?1", [user.email])?;

            let user_row = query_user(&tx, "id", user.id)?
                .ok_or_else(|| anyhow!("user {} vanished during signup", user.id))?;
            let project_row = query_project(&tx, project.id)?
                .ok_or_else(|| anyhow!("project {} vanished during signup", project.id))?;

            tx.commit()?;
            Ok(Some((user_row, project_row)))
        })
    }
}
