use anyhow::Result;
use rusqlite::{Connection, Row, params};

use super::OptionalExt;
use crate::Database;
use crate::models::NotificationRow;

const NOTIFICATION_COLUMNS: &str = "id, title, body, target, user_id, is_read, read_by, created_at";

/// Result of marking a notification read on behalf of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Marked,
    AlreadyRead,
    /// Targeted at somebody else.
    NotRecipient,
    NotFound,
}

impl Database {
    /// Insert a notification. `user_id = None` makes it a broadcast.
    pub fn insert_notification(
        &self,
        id: &str,
        title: &str,
        body: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let target = if user_id.is_some() { "user" } else { "all" };
            conn.execute(
                "INSERT INTO notifications (id, title, body, target, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, title, body, target, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| query_notification(conn, id))
    }

    /// Notifications visible to `user_id`: addressed to them or broadcast.
    pub fn list_notifications_for(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| query_visible(conn, user_id))
    }

    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<ReadOutcome> {
        self.with_conn(|conn| {
            let Some(row) = query_notification(conn, id)? else {
                return Ok(ReadOutcome::NotFound);
            };
            mark_read(conn, &row, user_id)
        })
    }

    /// Mark everything visible to `user_id` as read. Returns the ids that
    /// changed.
    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut marked = Vec::new();
            for row in query_visible(&tx, user_id)?.iter().filter(|r| !r.is_read_by(user_id)) {
                if mark_read(&tx, row, user_id)? == ReadOutcome::Marked {
                    marked.push(row.id.clone());
                }
            }
            tx.commit()?;
            Ok(marked)
        })
    }

    pub fn delete_notification(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }
}

fn mark_read(conn: &Connection, row: &NotificationRow, user_id: &str) -> Result<ReadOutcome> {
    if row.target == "all" {
        // Append against the stored list, not the snapshot in `row`
        let changed = conn.execute(
            "UPDATE notifications
             SET read_by = json_insert(read_by, '$[#]', ?2)
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM json_each(notifications.read_by) WHERE value = ?2)",
            params![row.id, user_id],
        )?;
        return Ok(if changed == 1 {
            ReadOutcome::Marked
        } else {
            ReadOutcome::AlreadyRead
        });
    }

    if row.user_id.as_deref() != Some(user_id) {
        return Ok(ReadOutcome::NotRecipient);
    }
    let changed = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0",
        [&row.id],
    )?;
    Ok(if changed == 1 {
        ReadOutcome::Marked
    } else {
        ReadOutcome::AlreadyRead
    })
}

fn query_visible(conn: &Connection, user_id: &str) -> Result<Vec<NotificationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications
         WHERE target = 'all' OR user_id = ?1
         ORDER BY created_at DESC, rowid DESC",
        NOTIFICATION_COLUMNS
    ))?;
    let rows = stmt
        .query_map([user_id], notification_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_notification(conn: &Connection, id: &str) -> Result<Option<NotificationRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE id = ?1",
        NOTIFICATION_COLUMNS
    ))?;
    stmt.query_row([id], notification_from_row).optional()
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    let read_by: String = row.get(6)?;
    Ok(NotificationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        target: row.get(3)?,
        user_id: row.get(4)?,
        is_read: row.get(5)?,
        // A damaged list reads as "nobody has read it"
        read_by: serde_json::from_str(&read_by).unwrap_or_default(),
        created_at: row.get(7)?,
    })
}
