use conclave_db::DbPool;
use conclave_models::gateway::EVENT_SIGNAL;
use serde_json::json;

use crate::error::CoreError;
use crate::events::EventBus;
use crate::{participant, session};

/// Relay a WebRTC offer/answer/ICE payload between two active participants
/// of an audio session. The payload is forwarded verbatim and never stored;
/// if the recipient has no open connection the event evaporates, which is
/// fine for signaling (the peer re-negotiates on reconnect).
pub async fn relay(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    from_user_id: i64,
    to_user_id: i64,
    payload: serde_json::Value,
) -> Result<(), CoreError> {
    let session = session::get_session(db, session_id).await?;
    if !session.is_active {
        return Err(CoreError::SessionEnded);
    }
    if session.mode != "audio" {
        return Err(CoreError::Forbidden);
    }
    participant::ensure_active_participant(db, session_id, from_user_id).await?;
    participant::ensure_active_participant(db, session_id, to_user_id).await?;

    events.dispatch_to_users(
        EVENT_SIGNAL,
        json!({
            "session_id": session_id.to_string(),
            "from_user_id": from_user_id.to_string(),
            "payload": payload,
        }),
        session_id,
        vec![to_user_id],
    );
    tracing::debug!(session_id, from_user_id, to_user_id, "signaling payload relayed");
    Ok(())
}
