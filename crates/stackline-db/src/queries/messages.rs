use anyhow::Result;
use rusqlite::{Row, params};
use stackline_types::models::MessageStatus;

use super::OptionalExt;
use crate::Database;
use crate::models::MessageRow;

const MESSAGE_COLUMNS: &str =
    "id, name, email, phone, company, service, content, status, ip_address, user_agent, created_at";

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub company: Option<&'a str>,
    pub service: Option<&'a str>,
    /// Already obfuscated.
    pub content: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl Database {
    pub fn insert_message(&self, message: &NewMessage<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, name, email, phone, company, service, content, status, ip_address, user_agent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'unread', ?8, ?9)",
                params![
                    message.id,
                    message.name,
                    message.email,
                    message.phone,
                    message.company,
                    message.service,
                    message.content,
                    message.ip_address,
                    message.user_agent,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE id = ?1",
                MESSAGE_COLUMNS
            ))?;
            stmt.query_row([id], message_from_row).optional()
        })
    }

    pub fn list_messages(&self, status: Option<MessageStatus>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY created_at DESC, rowid DESC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([status.map(|s| s.as_str())], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        company: row.get(4)?,
        service: row.get(5)?,
        content: row.get(6)?,
        status: row.get(7)?,
        ip_address: row.get(8)?,
        user_agent: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    fn submit(db: &Database, id: &str) {
        db.insert_message(&NewMessage {
            id,
            name: "Grace",
            email: "grace@example.com",
            phone: None,
            company: Some("Navy"),
            service: Some("web-development"),
            content: "SGVsbG8=",
            ip_address: Some("203.0.113.9"),
            user_agent: Some("curl/8.0"),
        })
        .unwrap();
    }

    #[test]
    fn new_messages_start_unread() {
        let db = fixtures::db();
        submit(&db, "m1");

        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.status, "unread");
        assert_eq!(row.content, "SGVsbG8=");
        assert_eq!(row.ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn status_filter_and_delete() {
        let db = fixtures::db();
        submit(&db, "m1");
        submit(&db, "m2");

        assert!(db.update_message_status("m1", MessageStatus::Read).unwrap());
        let unread = db.list_messages(Some(MessageStatus::Unread)).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, "m2");

        assert!(db.delete_message("m2").unwrap());
        assert!(!db.delete_message("m2").unwrap());
        assert_eq!(db.list_messages(None).unwrap().len(), 1);
    }
}
