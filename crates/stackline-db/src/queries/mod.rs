//! Query methods on `Database`, one file per table family.

pub mod audit;
pub mod invoices;
pub mod messages;
pub mod notifications;
pub mod projects;
pub mod signup;
pub mod stats;
pub mod subscriptions;
pub mod tickets;
pub mod users;

use anyhow::Result;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::Database;
    use crate::queries::users::NewUser;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn client(db: &Database, id: &str) {
        db.create_user(&NewUser {
            id,
            email: &format!("{}@example.com", id),
            password_hash: Some("hash"),
            role: stackline_types::models::Role::Client,
            google_id: None,
            name: Some("Test Client"),
            company: None,
            phone: None,
        })
        .unwrap();
    }
}
