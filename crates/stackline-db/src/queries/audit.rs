use anyhow::Result;
use rusqlite::{Row, params};

use crate::Database;
use crate::models::AuditLogRow;

const AUDIT_COLUMNS: &str = "id, actor_id, action, detail, ip_address, created_at";

#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub actor_id: Option<String>,
}

impl Database {
    /// Append an entry. Entries are never updated or deleted.
    pub fn insert_audit_log(
        &self,
        id: &str,
        actor_id: Option<&str>,
        action: &str,
        detail: &str,
        ip_address: Option<&str>,
    ) -> Result<AuditLogRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (id, actor_id, action, detail, ip_address)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, actor_id, action, detail, ip_address],
            )?;
            let row = conn.query_row(
                &format!("SELECT {} FROM audit_logs WHERE id = ?1", AUDIT_COLUMNS),
                [id],
                audit_from_row,
            )?;
            Ok(row)
        })
    }

    /// One page of entries, newest first, plus the total matching count.
    pub fn list_audit_logs(
        &self,
        filter: &AuditFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<AuditLogRow>, u64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_logs
                 WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR actor_id = ?2)",
                params![filter.action, filter.actor_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM audit_logs
                 WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR actor_id = ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3 OFFSET ?4",
                AUDIT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![filter.action, filter.actor_id, limit, offset],
                    audit_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total as u64))
        })
    }

    pub fn list_audit_actions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT action FROM audit_logs ORDER BY action")?;
            let actions = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(actions)
        })
    }
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogRow> {
    Ok(AuditLogRow {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        action: row.get(2)?,
        detail: row.get(3)?,
        ip_address: row.get(4)?,
        created_at: row.get(5)?,
    })
}
