use conclave_db::{participants, DbPool};

use crate::error::CoreError;

/// The single authorization predicate for attaching to a session's realtime
/// channel: the user is an active participant or the session's creator.
/// Callers must evaluate this on every connection attempt rather than
/// caching the answer, since a removal between connections must deny the
/// next subscribe.
pub async fn can_subscribe(
    db: &DbPool,
    user_id: i64,
    session_id: i64,
) -> Result<bool, CoreError> {
    Ok(participants::subscriber_exists(db, session_id, user_id).await?)
}

/// Same predicate as [`can_subscribe`], surfaced as Forbidden for REST
/// handlers that read session-scoped data.
pub async fn ensure_subscriber(
    db: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<(), CoreError> {
    if can_subscribe(db, user_id, session_id).await? {
        Ok(())
    } else {
        Err(CoreError::Forbidden)
    }
}
