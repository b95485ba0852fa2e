use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    BillingCycle, InvoiceStatus, MessageStatus, NotificationTarget, ProjectStatus, Role,
    SubscriptionStatus, TicketPriority, TicketStatus,
};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the socket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleLoginRequest {
    /// Google ID token as handed to the browser by Google Identity Services.
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub has_password: bool,
    pub google_linked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: String,
}

// -- Contact messages --

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub service: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub service: Option<String>,
    pub content: String,
    pub status: MessageStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Signup wizard --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveProgressRequest {
    pub email: String,
    pub step: u32,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SignupProgressResponse {
    pub email: String,
    pub step: u32,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteSignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub plan: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: UserResponse,
    pub token: String,
    pub project: ProjectResponse,
}

// -- Projects --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: Option<String>,
    pub plan: String,
    pub status: ProjectStatus,
    pub notes: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProjectRequest {
    pub status: Option<ProjectStatus>,
    pub notes: Option<String>,
    pub plan: Option<String>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub target: NotificationTarget,
    pub user_id: Option<Uuid>,
    /// Read state for the requesting user; always false in broadcast payloads.
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNotificationRequest {
    pub title: String,
    pub body: String,
    /// `None` broadcasts to every user.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

// -- Audit --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub detail: serde_json::Value,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub items: Vec<AuditLogResponse>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

// -- Tickets --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: TicketPriority,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketReplyRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketReply {
    pub id: Uuid,
    pub sender_role: Role,
    pub sender_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub responses: Vec<TicketReply>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Subscriptions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionRequest {
    pub plan: String,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendSubscriptionRequest {
    pub periods: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub project_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub subscription: SubscriptionResponse,
    pub project: ProjectResponse,
}

// -- Invoices --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateInvoiceRequest {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestInvoiceRequest {
    pub description: String,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendInvoiceRequest {
    pub amount_cents: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub due_date: Option<NaiveDate>,
    pub description: String,
    pub status: InvoiceStatus,
    pub overdue: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Generic admin resource family --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceUpdateRequest {
    pub resource: String,
    pub id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRef {
    pub resource: String,
    pub id: Uuid,
}

// -- Dashboard --

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardStats {
    pub users: u64,
    pub unread_messages: u64,
    pub open_tickets: u64,
    pub pending_subscriptions: u64,
    pub unpaid_invoices: u64,
    /// Authenticated sockets currently attached to the gateway.
    pub online_connections: u64,
}
