use conclave_db::sessions::{self, SessionFilter, SessionRow};
use conclave_db::participants::ParticipantRow;
use conclave_db::DbPool;
use conclave_models::gateway::EVENT_SESSION_ENDED;
use conclave_models::session::SessionMode;
use serde_json::json;

use crate::error::CoreError;
use crate::events::EventBus;

/// Create a session and seed it with its creator as the first active
/// participant.
pub async fn create_session(
    db: &DbPool,
    creator_id: i64,
    title: &str,
    description: Option<&str>,
    mode: &str,
    max_participants: i32,
) -> Result<(SessionRow, ParticipantRow), CoreError> {
    conclave_util::validation::validate_session_title(title)
        .map_err(|e| CoreError::Validation(format!("title: {e}")))?;
    let mode = SessionMode::parse(mode)
        .ok_or_else(|| CoreError::Validation(format!("unknown session mode '{mode}'")))?;
    if max_participants < 1 {
        return Err(CoreError::Validation(
            "max_participants must be at least 1".into(),
        ));
    }

    let session_id = conclave_util::snowflake::generate(1);
    let (session, creator) = sessions::create_session_with_creator(
        db,
        session_id,
        title,
        description,
        creator_id,
        mode.as_str(),
        max_participants,
    )
    .await?;

    tracing::info!(session_id, creator_id, mode = mode.as_str(), "session created");
    Ok((session, creator))
}

pub async fn get_session(db: &DbPool, session_id: i64) -> Result<SessionRow, CoreError> {
    sessions::get_session(db, session_id)
        .await?
        .ok_or(CoreError::NotFound)
}

/// End a session. Only the creator or an admin may end it; the active flag
/// flips exactly once, so a repeated end is a quiet no-op and the
/// SESSION_ENDED event fires only for the call that actually flipped it.
pub async fn end_session(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    actor_id: i64,
    actor_is_admin: bool,
) -> Result<SessionRow, CoreError> {
    let session = get_session(db, session_id).await?;
    if session.creator_id != actor_id && !actor_is_admin {
        return Err(CoreError::Forbidden);
    }

    match sessions::end_session(db, session_id).await? {
        Some(ended) => {
            events.dispatch(
                EVENT_SESSION_ENDED,
                json!({
                    "session_id": ended.id.to_string(),
                    "ended_by": actor_id.to_string(),
                }),
                ended.id,
            );
            tracing::info!(session_id, actor_id, "session ended");
            Ok(ended)
        }
        // Already ended; return the current row without re-firing events.
        None => Ok(session),
    }
}

pub async fn list_sessions(
    db: &DbPool,
    filter: SessionFilter,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<SessionRow>, CoreError> {
    Ok(sessions::list_sessions(db, filter, before, limit).await?)
}

pub fn session_json(session: &SessionRow) -> serde_json::Value {
    json!({
        "id": session.id.to_string(),
        "title": session.title,
        "description": session.description,
        "creator_id": session.creator_id.to_string(),
        "mode": session.mode,
        "max_participants": session.max_participants,
        "is_active": session.is_active,
        "created_at": session.created_at.to_rfc3339(),
    })
}
