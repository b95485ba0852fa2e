use anyhow::Result;
use rusqlite::{Row, params};
use stackline_types::models::{Role, TicketPriority, TicketStatus};

use super::OptionalExt;
use crate::Database;
use crate::models::{TicketResponseRow, TicketRow};

const TICKET_COLUMNS: &str = "id, user_id, subject, message, priority, status, created_at, updated_at";

pub struct NewTicket<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub subject: &'a str,
    /// Already obfuscated.
    pub message: &'a str,
    pub priority: TicketPriority,
}

pub struct NewTicketResponse<'a> {
    pub id: &'a str,
    pub ticket_id: &'a str,
    pub sender_role: Role,
    pub sender_id: &'a str,
    /// Already obfuscated.
    pub message: &'a str,
}

impl Database {
    pub fn insert_ticket(&self, ticket: &NewTicket<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tickets (id, user_id, subject, message, priority, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'open')",
                params![
                    ticket.id,
                    ticket.user_id,
                    ticket.subject,
                    ticket.message,
                    ticket.priority.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_ticket(&self, id: &str) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS))?;
            stmt.query_row([id], ticket_from_row).optional()
        })
    }

    /// All tickets, or only those opened by `user_id`. Most recently active first.
    pub fn list_tickets(&self, user_id: Option<&str>) -> Result<Vec<TicketRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tickets
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
                TICKET_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id], ticket_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch responses for a set of tickets, oldest first.
    pub fn get_responses_for_tickets(&self, ticket_ids: &[String]) -> Result<Vec<TicketResponseRow>> {
        if ticket_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ticket_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, ticket_id, sender_role, sender_id, message, created_at
                 FROM ticket_responses WHERE ticket_id IN ({})
                 ORDER BY created_at ASC, rowid ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ticket_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), response_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Append a response and move the ticket to `status` in one transaction.
    /// Returns false, writing nothing, if the ticket is missing or closed.
    pub fn add_ticket_response(
        &self,
        response: &NewTicketResponse<'_>,
        status: TicketStatus,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE tickets SET status = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND status != 'closed'",
                params![response.ticket_id, status.as_str()],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO ticket_responses (id, ticket_id, sender_role, sender_id, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    response.id,
                    response.ticket_id,
                    response.sender_role.as_str(),
                    response.sender_id,
                    response.message,
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn update_ticket_status(&self, id: &str, status: TicketStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tickets SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, status.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Delete a ticket; its responses go with it.
    pub fn delete_ticket(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM tickets WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject: row.get(2)?,
        message: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<TicketResponseRow> {
    Ok(TicketResponseRow {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        sender_role: row.get(2)?,
        sender_id: row.get(3)?,
        message: row.get(4)?,
        created_at: row.get(5)?,
    })
}
