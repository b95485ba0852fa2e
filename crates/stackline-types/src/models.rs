use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a string-backed enum whose wire form, database form and
/// `Display` output are the same literal.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    Role ("role") {
        Client => "client",
        Admin => "admin",
    }
}

string_enum! {
    ProjectStatus ("project status") {
        Pending => "pending",
        InProgress => "in-progress",
        Completed => "completed",
        OnHold => "on-hold",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Contact-form message triage state.
    MessageStatus ("message status") {
        Unread => "unread",
        Read => "read",
        Archived => "archived",
    }
}

string_enum! {
    /// Whether a notification addresses one user or everybody.
    NotificationTarget ("notification target") {
        User => "user",
        All => "all",
    }
}

string_enum! {
    TicketStatus ("ticket status") {
        Open => "open",
        Answered => "answered",
        Closed => "closed",
    }
}

string_enum! {
    TicketPriority ("ticket priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    SubscriptionStatus ("subscription status") {
        Pending => "pending",
        Active => "active",
        Rejected => "rejected",
        Cancelled => "cancelled",
        Extended => "extended",
    }
}

string_enum! {
    BillingCycle ("billing cycle") {
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

string_enum! {
    /// `Paid` keeps its capitalised wire form; dashboards match on it literally.
    InvoiceStatus ("invoice status") {
        Requested => "requested",
        Sent => "sent",
        Paid => "Paid",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Resources reachable through the generic admin update/delete endpoints.
    ResourceKind ("resource") {
        Message => "message",
        Project => "project",
        Ticket => "ticket",
        Invoice => "invoice",
    }
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl SubscriptionStatus {
    /// Allowed moves of the subscription state machine.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Active, Extended)
                | (Active, Cancelled)
                | (Extended, Extended)
                | (Extended, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Rejected | SubscriptionStatus::Cancelled)
    }
}

impl BillingCycle {
    /// Length of one billing period in days.
    pub fn period_days(&self) -> i64 {
        match self {
            BillingCycle::Monthly => 30,
            BillingCycle::Yearly => 365,
        }
    }
}

impl Default for TicketPriority {
    fn default() -> Self {
        TicketPriority::Medium
    }
}

impl Default for BillingCycle {
    fn default() -> Self {
        BillingCycle::Monthly
    }
}
