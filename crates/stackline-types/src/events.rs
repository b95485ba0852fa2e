use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    AuditLogResponse, InvoiceResponse, MessageResponse, NotificationResponse, ProjectResponse,
    SubscriptionResponse, TicketResponse, UserResponse,
};
use crate::models::{MessageStatus, Role};

/// Events pushed over the dashboard socket. Every mutation emits one so that
/// open dashboards can refresh without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, role: Role },

    UserRegistered { user: UserResponse },
    UserUpdated { user: UserResponse },

    /// The signup wizard finished and produced an account plus project
    NewSignup { user: UserResponse, project: ProjectResponse },

    /// A contact-form submission arrived
    NewMessage { message: MessageResponse },
    MessageUpdated { id: Uuid, status: MessageStatus },
    MessageDeleted { id: Uuid },

    ProjectCreated { project: ProjectResponse },
    ProjectUpdated { project: ProjectResponse },
    ProjectDeleted { id: Uuid },

    NewNotification { notification: NotificationResponse },
    NotificationRead { id: Uuid, user_id: Uuid },
    NotificationDeleted { id: Uuid },

    /// Any ticket change: creation, reply, status change
    UpdateTickets { ticket: TicketResponse },
    TicketDeleted { id: Uuid },

    SubscriptionUpdated { subscription: SubscriptionResponse },

    InvoiceCreated { invoice: InvoiceResponse },
    InvoiceUpdated { invoice: InvoiceResponse },
    InvoicePaid { invoice: InvoiceResponse },
    InvoiceDeleted { id: Uuid },

    NewAuditLog { entry: AuditLogResponse },
}

impl GatewayEvent {
    /// Wire name of the event, as found in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::UserRegistered { .. } => "user_registered",
            Self::UserUpdated { .. } => "user_updated",
            Self::NewSignup { .. } => "new_signup",
            Self::NewMessage { .. } => "new_message",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ProjectCreated { .. } => "project_created",
            Self::ProjectUpdated { .. } => "project_updated",
            Self::ProjectDeleted { .. } => "project_deleted",
            Self::NewNotification { .. } => "new_notification",
            Self::NotificationRead { .. } => "notification_read",
            Self::NotificationDeleted { .. } => "notification_deleted",
            Self::UpdateTickets { .. } => "update_tickets",
            Self::TicketDeleted { .. } => "ticket_deleted",
            Self::SubscriptionUpdated { .. } => "subscription_updated",
            Self::InvoiceCreated { .. } => "invoice_created",
            Self::InvoiceUpdated { .. } => "invoice_updated",
            Self::InvoicePaid { .. } => "invoice_paid",
            Self::InvoiceDeleted { .. } => "invoice_deleted",
            Self::NewAuditLog { .. } => "new_audit_log",
        }
    }
}

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate a connection opened without a `token` query parameter
    Identify { token: String },

    /// Application-level keepalive for clients that cannot answer pings
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_matches_serialized_tag() {
        let id = Uuid::new_v4();
        let events = [
            GatewayEvent::MessageDeleted { id },
            GatewayEvent::InvoiceDeleted { id },
            GatewayEvent::NotificationRead { id, user_id: id },
            GatewayEvent::Ready { user_id: id, role: Role::Admin },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
            assert!(json.get("data").is_some());
        }
    }

    #[test]
    fn commands_parse_from_wire() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"command":"identify","data":{"token":"abc"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Identify { token } if token == "abc"));

        let cmd: GatewayCommand = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Ping));
    }
}
