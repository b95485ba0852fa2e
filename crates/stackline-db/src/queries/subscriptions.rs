use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use stackline_types::models::{BillingCycle, SubscriptionStatus};

use super::OptionalExt;
use super::projects::{NewProject, insert_project, query_project};
use crate::Database;
use crate::models::{ProjectRow, SubscriptionRow, to_db_timestamp};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, billing_cycle, status, start_date, end_date,
    project_id, created_at, updated_at";

impl Database {
    pub fn insert_subscription(
        &self,
        id: &str,
        user_id: &str,
        plan: &str,
        billing_cycle: BillingCycle,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subscriptions (id, user_id, plan, billing_cycle, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
                params![id, user_id, plan, billing_cycle.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| query_subscription(conn, id))
    }

    pub fn list_subscriptions(&self, user_id: Option<&str>) -> Result<Vec<SubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subscriptions
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                SUBSCRIPTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id], subscription_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Activate a pending subscription and create its project in one
    /// transaction. Returns `None` when the subscription is not pending
    /// (or does not exist); nothing is written in that case.
    pub fn approve_subscription(
        &self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        project_id: &str,
        notes: Option<&str>,
    ) -> Result<Option<(SubscriptionRow, ProjectRow)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(current) = query_subscription(&tx, id)? else {
                return Ok(None);
            };

            let changed = tx.execute(
                "UPDATE subscriptions
                 SET status = 'active', start_date = ?2, end_date = ?3, project_id = ?4,
                     updated_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id, to_db_timestamp(start), to_db_timestamp(end), project_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            insert_project(
                &tx,
                &NewProject {
                    id: project_id,
                    owner_id: &current.user_id,
                    plan: &current.plan,
                    notes,
                    subscription_id: Some(id),
                },
            )?;

            let subscription = query_subscription(&tx, id)?
                .ok_or_else(|| anyhow!("subscription {} vanished during approval", id))?;
            let project = query_project(&tx, project_id)?
                .ok_or_else(|| anyhow!("project {} vanished during approval", project_id))?;

            tx.commit()?;
            Ok(Some((subscription, project)))
        })
    }

    /// Compare-and-set status change. `end_date`, when given, replaces the
    /// stored end date. Returns false if the row was not in `expected`.
    pub fn transition_subscription(
        &self,
        id: &str,
        expected: SubscriptionStatus,
        next: SubscriptionStatus,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE subscriptions
                 SET status = ?3, end_date = COALESCE(?4, end_date), updated_at = datetime('now')
                 WHERE id = ?1 AND status = ?2",
                params![
                    id,
                    expected.as_str(),
                    next.as_str(),
                    end_date.map(to_db_timestamp),
                ],
            )?;
            Ok(changed == 1)
        })
    }
}

fn query_subscription(conn: &Connection, id: &str) -> Result<Option<SubscriptionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM subscriptions WHERE id = ?1",
        SUBSCRIPTION_COLUMNS
    ))?;
    stmt.query_row([id], subscription_from_row).optional()
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRow> {
    Ok(SubscriptionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan: row.get(2)?,
        billing_cycle: row.get(3)?,
        status: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        project_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
