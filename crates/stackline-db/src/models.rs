//! Database row types. These map directly to SQLite rows.
//! Distinct from stackline-types API models to keep the DB layer independent.
//! Obfuscated columns are carried as stored; callers reveal them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Format used for every timestamp column, matching SQLite's `datetime('now')`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts SQLite's naive UTC form and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|ndt| ndt.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub google_id: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub plan: String,
    pub status: String,
    pub notes: Option<String>,
    pub subscription_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub service: Option<String>,
    pub content: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub title: String,
    pub body: String,
    pub target: String,
    pub user_id: Option<String>,
    pub is_read: bool,
    pub read_by: Vec<String>,
    pub created_at: String,
}

impl NotificationRow {
    /// Read state as seen by `user_id`; broadcast rows track readers by list.
    pub fn is_read_by(&self, user_id: &str) -> bool {
        if self.target == "all" {
            self.read_by.iter().any(|id| id == user_id)
        } else {
            self.is_read
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogRow {
    pub id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub detail: String,
    pub ip_address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SignupProgressRow {
    pub email: String,
    pub step: u32,
    pub data: String,
    pub updated_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone)]
pub struct TicketRow {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub message: String,
    pub priority: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct TicketResponseRow {
    pub id: String,
    pub ticket_id: String,
    pub sender_role: String,
    pub sender_id: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub billing_cycle: String,
    pub status: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub project_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct InvoiceRow {
    pub id: String,
    pub user_id: String,
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub due_date: Option<String>,
    pub description: String,
    pub status: String,
    pub paid_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_parse_in_both_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-03-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp(&to_db_timestamp(expected)), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn broadcast_read_state_is_per_user() {
        let row = NotificationRow {
            id: "n1".into(),
            title: "Maintenance".into(),
            body: "Tonight".into(),
            target: "all".into(),
            user_id: None,
            is_read: false,
            read_by: vec!["u1".into()],
            created_at: "2026-03-01 12:30:00".into(),
        };
        assert!(row.is_read_by("u1"));
        assert!(!row.is_read_by("u2"));
    }
}
