use conclave_db::participants::{self, ParticipantRow, TransitionOutcome};
use conclave_db::DbPool;
use conclave_models::gateway::EVENT_PARTICIPANT_UPDATED;
use conclave_models::participant::ParticipantStatus;
use serde_json::json;

use crate::error::CoreError;
use crate::events::EventBus;
use crate::session;

/// Map a storage-level transition outcome to the caller-facing result.
/// `NoOp` is success (idempotent retries); `InvalidState` means the
/// operation is not permitted from the row's current state.
fn resolve(outcome: TransitionOutcome) -> Result<(ParticipantRow, bool), CoreError> {
    match outcome {
        TransitionOutcome::Applied(row) => Ok((row, true)),
        TransitionOutcome::NoOp(row) => Ok((row, false)),
        TransitionOutcome::InvalidState(_) => Err(CoreError::Forbidden),
        TransitionOutcome::CapacityExceeded => Err(CoreError::CapacityExceeded),
        TransitionOutcome::SessionEnded => Err(CoreError::SessionEnded),
        TransitionOutcome::SessionNotFound => Err(CoreError::NotFound),
        TransitionOutcome::ParticipantNotFound => Err(CoreError::NotFound),
    }
}

fn dispatch_update(events: &EventBus, row: &ParticipantRow) {
    events.dispatch(
        EVENT_PARTICIPANT_UPDATED,
        participant_json(row),
        row.session_id,
    );
}

/// Require the actor to currently be an active participant of the session.
pub async fn ensure_active_participant(
    db: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<ParticipantRow, CoreError> {
    let participant = participants::get_participant(db, session_id, user_id)
        .await?
        .ok_or(CoreError::Forbidden)?;
    if participant.status != ParticipantStatus::Active.as_str() {
        return Err(CoreError::Forbidden);
    }
    Ok(participant)
}

/// Invite a user. Any active participant may invite; the capacity check
/// here is advisory (re-checked at accept time).
pub async fn invite(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    inviter_id: i64,
    target_user_id: i64,
) -> Result<ParticipantRow, CoreError> {
    let session = session::get_session(db, session_id).await?;
    if !session.is_active {
        return Err(CoreError::SessionEnded);
    }
    ensure_active_participant(db, session_id, inviter_id).await?;

    let (row, applied) = resolve(participants::invite(db, session_id, target_user_id).await?)?;
    if applied {
        dispatch_update(events, &row);
        // Nudge the invitee directly; they are not yet a channel subscriber.
        events.dispatch_to_users(
            EVENT_PARTICIPANT_UPDATED,
            participant_json(&row),
            session_id,
            vec![target_user_id],
        );
    }
    Ok(row)
}

/// Self-service join request; idempotent while pending.
pub async fn request_join(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    user_id: i64,
) -> Result<ParticipantRow, CoreError> {
    let (row, applied) = resolve(participants::request_join(db, session_id, user_id).await?)?;
    if applied {
        // Let the creator know someone is waiting for approval.
        events.dispatch_to_users(
            EVENT_PARTICIPANT_UPDATED,
            participant_json(&row),
            session_id,
            vec![session::get_session(db, session_id).await?.creator_id],
        );
    }
    Ok(row)
}

/// Accept one's own invitation: `invited` -> `active`, capacity permitting.
pub async fn accept(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    user_id: i64,
) -> Result<ParticipantRow, CoreError> {
    let (row, applied) = resolve(
        participants::activate(db, session_id, user_id, ParticipantStatus::Invited.as_str()).await?,
    )?;
    if applied {
        dispatch_update(events, &row);
    }
    Ok(row)
}

/// Creator approval of a pending join request: `pending` -> `active`.
pub async fn approve(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    approver_id: i64,
    user_id: i64,
    approver_is_admin: bool,
) -> Result<ParticipantRow, CoreError> {
    let session = session::get_session(db, session_id).await?;
    if session.creator_id != approver_id && !approver_is_admin {
        return Err(CoreError::Forbidden);
    }

    let (row, applied) = resolve(
        participants::activate(db, session_id, user_id, ParticipantStatus::Pending.as_str()).await?,
    )?;
    if applied {
        dispatch_update(events, &row);
    }
    Ok(row)
}

/// Creator rejection of a pending join request: `pending` -> `removed`.
pub async fn reject(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    approver_id: i64,
    user_id: i64,
    approver_is_admin: bool,
) -> Result<ParticipantRow, CoreError> {
    let session = session::get_session(db, session_id).await?;
    if session.creator_id != approver_id && !approver_is_admin {
        return Err(CoreError::Forbidden);
    }

    let (row, applied) = resolve(
        participants::mark_removed(db, session_id, user_id, Some(ParticipantStatus::Pending.as_str()))
            .await?,
    )?;
    if applied {
        dispatch_update(events, &row);
    }
    Ok(row)
}

/// Kick a participant (creator or admin, any state). Removing an
/// already-removed participant is a no-op.
pub async fn remove(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    actor_id: i64,
    user_id: i64,
    actor_is_admin: bool,
) -> Result<ParticipantRow, CoreError> {
    let session = session::get_session(db, session_id).await?;
    if session.creator_id != actor_id && !actor_is_admin {
        return Err(CoreError::Forbidden);
    }

    let (row, applied) = resolve(participants::mark_removed(db, session_id, user_id, None).await?)?;
    if applied {
        dispatch_update(events, &row);
    }
    Ok(row)
}

/// Leave a session: `active` -> `removed`. The creator leaving does not end
/// the session or reassign ownership; the session simply carries on.
pub async fn leave(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    user_id: i64,
) -> Result<ParticipantRow, CoreError> {
    let (row, applied) = resolve(
        participants::mark_removed(db, session_id, user_id, Some(ParticipantStatus::Active.as_str()))
            .await?,
    )?;
    if applied {
        dispatch_update(events, &row);
    }
    Ok(row)
}

pub async fn list_participants(
    db: &DbPool,
    session_id: i64,
) -> Result<Vec<ParticipantRow>, CoreError> {
    session::get_session(db, session_id).await?;
    Ok(participants::list_participants(db, session_id).await?)
}

pub fn participant_json(row: &ParticipantRow) -> serde_json::Value {
    json!({
        "session_id": row.session_id.to_string(),
        "user_id": row.user_id.to_string(),
        "role": row.role,
        "status": row.status,
        "joined_at": row.joined_at.map(|t| t.to_rfc3339()),
        "updated_at": row.updated_at.to_rfc3339(),
    })
}
