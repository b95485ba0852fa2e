use axum::{
    Router, middleware,
    routing::{delete, get, patch, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{
    audit, contact, dashboard, invoices, notifications, projects, resources, signup,
    subscriptions, tickets, users,
};

/// Every REST route, mounted under `/api`. The socket upgrade lives in the
/// server crate because it needs the raw token query.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(dashboard::health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/google", post(auth::google_login))
        .route("/contact", post(contact::submit_contact))
        .route(
            "/signup/progress",
            put(signup::save_progress)
                .get(signup::load_progress)
                .delete(signup::clear_progress),
        )
        .route("/signup/complete", post(signup::complete_signup));

    let protected_routes = Router::new()
        // Profile
        .route("/me", get(users::get_me).put(users::update_me))
        .route("/me/password", put(users::change_password))
        // Projects
        .route("/projects", get(projects::list_projects))
        .route("/projects/{id}", patch(projects::update_project))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        // Tickets
        .route("/tickets", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/tickets/{id}", get(tickets::get_ticket))
        .route("/tickets/{id}/responses", post(tickets::respond))
        .route("/tickets/{id}/close", post(tickets::close_ticket))
        // Subscriptions
        .route(
            "/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::request_subscription),
        )
        .route("/subscriptions/{id}/cancel", post(subscriptions::cancel))
        // Invoices
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices/request", post(invoices::request_invoice))
        .route("/invoices/{id}/pay", post(invoices::pay_invoice))
        // Admin
        .route("/admin/users", get(users::list_users))
        .route("/admin/messages", get(contact::list_messages))
        .route("/admin/notifications", post(notifications::create_notification))
        .route("/admin/notifications/{id}", delete(notifications::delete_notification))
        .route("/admin/audit-logs", get(audit::list_audit_logs))
        .route("/admin/audit-logs/actions", get(audit::list_audit_actions))
        .route("/admin/subscriptions/{id}/approve", post(subscriptions::approve))
        .route("/admin/subscriptions/{id}/reject", post(subscriptions::reject))
        .route("/admin/subscriptions/{id}/extend", post(subscriptions::extend))
        .route("/admin/invoices", post(invoices::create_invoice))
        .route("/admin/invoices/{id}/send", post(invoices::send_invoice))
        .route(
            "/admin/resources",
            patch(resources::update_resource).delete(resources::delete_resource),
        )
        .route("/admin/stats", get(dashboard::stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new().nest(
        "/api",
        public_routes.merge(protected_routes).with_state(state),
    )
}
