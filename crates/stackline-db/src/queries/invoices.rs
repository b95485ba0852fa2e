use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Row, params};
use stackline_types::models::InvoiceStatus;

use super::OptionalExt;
use crate::Database;
use crate::models::{InvoiceRow, to_db_timestamp};

const INVOICE_COLUMNS: &str = "id, user_id, reference, amount_cents, currency, due_date, description,
    status, paid_at, created_at, updated_at";

pub struct NewInvoice<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub reference: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub due_date: Option<NaiveDate>,
    /// Already obfuscated.
    pub description: &'a str,
    pub status: InvoiceStatus,
}

/// Result of a guarded invoice deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceDeletion {
    Deleted,
    Paid,
    NotFound,
}

impl Database {
    pub fn insert_invoice(&self, invoice: &NewInvoice<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO invoices
                    (id, user_id, reference, amount_cents, currency, due_date, description, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    invoice.id,
                    invoice.user_id,
                    invoice.reference,
                    invoice.amount_cents,
                    invoice.currency,
                    invoice.due_date.map(|d| d.to_string()),
                    invoice.description,
                    invoice.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_invoice(&self, id: &str) -> Result<Option<InvoiceRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLUMNS))?;
            stmt.query_row([id], invoice_from_row).optional()
        })
    }

    pub fn list_invoices(&self, user_id: Option<&str>) -> Result<Vec<InvoiceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM invoices
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                INVOICE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id], invoice_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move a requested invoice to `sent`, optionally filling amount and due date.
    pub fn send_invoice(
        &self,
        id: &str,
        amount_cents: Option<i64>,
        due_date: Option<NaiveDate>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE invoices
                 SET status = 'sent',
                     amount_cents = COALESCE(?2, amount_cents),
                     due_date = COALESCE(?3, due_date),
                     updated_at = datetime('now')
                 WHERE id = ?1 AND status = 'requested'",
                params![id, amount_cents, due_date.map(|d| d.to_string())],
            )?;
            Ok(changed == 1)
        })
    }

    /// Settle a sent invoice. Returns false unless it was `sent`.
    pub fn mark_invoice_paid(&self, id: &str, paid_at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE invoices SET status = 'Paid', paid_at = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND status = 'sent'",
                params![id, to_db_timestamp(paid_at)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Cancel an invoice that is still open. Paid and cancelled invoices
    /// are left alone.
    pub fn cancel_invoice(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE invoices SET status = 'cancelled', updated_at = datetime('now')
                 WHERE id = ?1 AND status IN ('requested', 'sent')",
                [id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Delete an invoice unless it has been paid.
    pub fn delete_invoice(&self, id: &str) -> Result<InvoiceDeletion> {
        self.with_conn(|conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM invoices WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;

            match status.as_deref() {
                None => Ok(InvoiceDeletion::NotFound),
                Some("Paid") => Ok(InvoiceDeletion::Paid),
                Some(_) => {
                    conn.execute("DELETE FROM invoices WHERE id = ?1 AND status != 'Paid'", [id])?;
                    Ok(InvoiceDeletion::Deleted)
                }
            }
        })
    }
}

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<InvoiceRow> {
    Ok(InvoiceRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        reference: row.get(2)?,
        amount_cents: row.get(3)?,
        currency: row.get(4)?,
        due_date: row.get(5)?,
        description: row.get(6)?,
        status: row.get(7)?,
        paid_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
