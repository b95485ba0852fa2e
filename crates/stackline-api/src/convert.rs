//! Row -> response conversions.
//!
//! Rows carry ids and timestamps as text and obfuscated columns as stored.
//! A value that fails to parse is logged and replaced rather than failing the
//! whole listing.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use stackline_codec::reveal;
use stackline_db::models::{
    AuditLogRow, InvoiceRow, MessageRow, NotificationRow, ProjectRow, SubscriptionRow,
    TicketResponseRow, TicketRow, UserRow, parse_date, parse_timestamp,
};
use stackline_types::api::{
    AuditLogResponse, InvoiceResponse, MessageResponse, NotificationResponse, ProjectResponse,
    SubscriptionResponse, TicketReply, TicketResponse, UserResponse,
};
use stackline_types::models::{
    BillingCycle, InvoiceStatus, MessageStatus, NotificationTarget, ProjectStatus, Role,
    SubscriptionStatus, TicketPriority, TicketStatus,
};

pub fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid stored id '{}': {}", raw, e);
        Uuid::nil()
    })
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Invalid stored timestamp '{}'", raw);
        DateTime::<Utc>::UNIX_EPOCH
    })
}

fn parse_opt_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.map(parse_ts)
}

fn parse_opt_date(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|d| {
        let parsed = parse_date(d);
        if parsed.is_none() {
            warn!("Invalid stored date '{}'", d);
        }
        parsed
    })
}

fn parse_enum<T>(raw: &str, fallback: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().unwrap_or_else(|e| {
        warn!("{}", e);
        fallback
    })
}

/// Reveal an obfuscated column. Text that does not decode is returned as-is.
pub fn reveal_text(stored: &str) -> String {
    reveal(stored).unwrap_or_else(|e| {
        warn!("Stored text failed to decode: {}", e);
        stored.to_string()
    })
}

pub fn user_response(row: &UserRow) -> UserResponse {
    UserResponse {
        id: parse_id(&row.id),
        email: row.email.clone(),
        role: parse_enum(&row.role, Role::Client),
        name: row.name.clone(),
        company: row.company.clone(),
        phone: row.phone.clone(),
        has_password: row.password_hash.is_some(),
        google_linked: row.google_id.is_some(),
        created_at: parse_ts(&row.created_at),
    }
}

pub fn project_response(row: &ProjectRow) -> ProjectResponse {
    ProjectResponse {
        id: parse_id(&row.id),
        owner_id: parse_id(&row.owner_id),
        owner_email: row.owner_email.clone(),
        plan: row.plan.clone(),
        status: parse_enum(&row.status, ProjectStatus::Pending),
        notes: row.notes.as_deref().map(reveal_text),
        subscription_id: row.subscription_id.as_deref().map(parse_id),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    }
}

pub fn message_response(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_id(&row.id),
        name: row.name.clone(),
        email: row.email.clone(),
        phone: row.phone.clone(),
        company: row.company.clone(),
        service: row.service.clone(),
        content: reveal_text(&row.content),
        status: parse_enum(&row.status, MessageStatus::Unread),
        ip_address: row.ip_address.clone(),
        user_agent: row.user_agent.clone(),
        created_at: parse_ts(&row.created_at),
    }
}

/// `viewer` decides the read flag; `None` (event payloads) reports unread.
pub fn notification_response(row: &NotificationRow, viewer: Option<&str>) -> NotificationResponse {
    NotificationResponse {
        id: parse_id(&row.id),
        title: row.title.clone(),
        body: row.body.clone(),
        target: parse_enum(&row.target, NotificationTarget::All),
        user_id: row.user_id.as_deref().map(parse_id),
        read: viewer.is_some_and(|v| row.is_read_by(v)),
        created_at: parse_ts(&row.created_at),
    }
}

pub fn audit_response(row: &AuditLogRow) -> AuditLogResponse {
    let detail = serde_json::from_str(&row.detail).unwrap_or_else(|e| {
        warn!("Audit entry {} has unreadable detail: {}", row.id, e);
        serde_json::Value::String(row.detail.clone())
    });

    AuditLogResponse {
        id: parse_id(&row.id),
        actor_id: row.actor_id.as_deref().map(parse_id),
        action: row.action.clone(),
        detail,
        ip_address: row.ip_address.clone(),
        created_at: parse_ts(&row.created_at),
    }
}

pub fn ticket_reply(row: &TicketResponseRow) -> TicketReply {
    TicketReply {
        id: parse_id(&row.id),
        sender_role: parse_enum(&row.sender_role, Role::Client),
        sender_id: parse_id(&row.sender_id),
        message: reveal_text(&row.message),
        created_at: parse_ts(&row.created_at),
    }
}

/// `replies` may hold responses of other tickets; only this ticket's are kept.
pub fn ticket_response(row: &TicketRow, replies: &[TicketResponseRow]) -> TicketResponse {
    TicketResponse {
        id: parse_id(&row.id),
        user_id: parse_id(&row.user_id),
        subject: row.subject.clone(),
        message: reveal_text(&row.message),
        priority: parse_enum(&row.priority, TicketPriority::Medium),
        status: parse_enum(&row.status, TicketStatus::Open),
        responses: replies
            .iter()
            .filter(|r| r.ticket_id == row.id)
            .map(ticket_reply)
            .collect(),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    }
}

pub fn subscription_response(row: &SubscriptionRow) -> SubscriptionResponse {
    SubscriptionResponse {
        id: parse_id(&row.id),
        user_id: parse_id(&row.user_id),
        plan: row.plan.clone(),
        billing_cycle: parse_enum(&row.billing_cycle, BillingCycle::Monthly),
        status: parse_enum(&row.status, SubscriptionStatus::Pending),
        start_date: parse_opt_ts(row.start_date.as_deref()),
        end_date: parse_opt_ts(row.end_date.as_deref()),
        project_id: row.project_id.as_deref().map(parse_id),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    }
}

/// An invoice is overdue when it was sent, is still unpaid and its due date
/// lies before `today`.
pub fn invoice_response(row: &InvoiceRow, today: NaiveDate) -> InvoiceResponse {
    let status = parse_enum(&row.status, InvoiceStatus::Requested);
    let due_date = parse_opt_date(row.due_date.as_deref());
    let overdue = status == InvoiceStatus::Sent && due_date.is_some_and(|due| due < today);

    InvoiceResponse {
        id: parse_id(&row.id),
        user_id: parse_id(&row.user_id),
        reference: row.reference.clone(),
        amount_cents: row.amount_cents,
        currency: row.currency.clone(),
        due_date,
        description: reveal_text(&row.description),
        status,
        overdue,
        paid_at: parse_opt_ts(row.paid_at.as_deref()),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    }
}
