use stackline_db::Database;

use crate::auth::AppState;
use crate::error::ApiError;

/// Run a database call on the blocking pool. The connection sits behind a
/// std mutex, so it must never be held on an async worker.
pub async fn run<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || f(&state.db)).await?;
    result.map_err(ApiError::from)
}
