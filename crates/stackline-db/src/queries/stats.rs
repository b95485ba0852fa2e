use anyhow::Result;

use crate::Database;

/// Headline numbers for the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardCounts {
    pub users: u64,
    pub unread_messages: u64,
    pub open_tickets: u64,
    pub pending_subscriptions: u64,
    pub unpaid_invoices: u64,
}

impl Database {
    pub fn dashboard_counts(&self) -> Result<DashboardCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM messages WHERE status = 'unread'),
                    (SELECT COUNT(*) FROM tickets WHERE status != 'closed'),
                    (SELECT COUNT(*) FROM subscriptions WHERE status = 'pending'),
                    (SELECT COUNT(*) FROM invoices WHERE status IN ('requested', 'sent'))",
                [],
                |row| {
                    Ok(DashboardCounts {
                        users: row.get::<_, i64>(0)? as u64,
                        unread_messages: row.get::<_, i64>(1)? as u64,
                        open_tickets: row.get::<_, i64>(2)? as u64,
                        pending_subscriptions: row.get::<_, i64>(3)? as u64,
                        unpaid_invoices: row.get::<_, i64>(4)? as u64,
                    })
                },
            )?;
            Ok(counts)
        })
    }
}
