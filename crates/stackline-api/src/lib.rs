pub mod audit;
pub mod auth;
pub mod blocking;
pub mod contact;
pub mod convert;
pub mod dashboard;
pub mod error;
pub mod google;
pub mod invoices;
pub mod middleware;
pub mod notifications;
pub mod projects;
pub mod resources;
pub mod routes;
pub mod signup;
pub mod subscriptions;
pub mod tickets;
pub mod users;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
