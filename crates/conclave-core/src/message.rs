use conclave_db::messages::{self, AppendOutcome, MessageRow};
use conclave_db::DbPool;
use conclave_models::gateway::{EVENT_MESSAGE_CREATE, EVENT_MESSAGE_DELETE};
use conclave_models::message::{AttachmentMeta, MessageType};
use serde_json::json;

use crate::error::CoreError;
use crate::events::EventBus;
use crate::{gate, session, AppConfig};

/// Append a message to the session log. Only active participants of a live
/// session may write; the snowflake id is the ordering key. The liveness
/// and membership checks run inside the insert's transaction, under the
/// same session row lock the participant transitions take, so an append
/// racing `end_session` (or a removal of the sender) cannot land after the
/// other write commits.
pub async fn append_message(
    db: &DbPool,
    events: &EventBus,
    config: &AppConfig,
    session_id: i64,
    sender_id: i64,
    content: Option<&str>,
    message_type: &str,
    attachment: Option<&AttachmentMeta>,
) -> Result<MessageRow, CoreError> {
    let message_type = MessageType::parse(message_type)
        .ok_or_else(|| CoreError::Validation(format!("unknown message type '{message_type}'")))?;
    match (content, attachment) {
        (None, None) => {
            return Err(CoreError::Validation(
                "message requires content or an attachment".into(),
            ))
        }
        (Some(text), _) => {
            conclave_util::validation::validate_message_content(text)
                .map_err(|e| CoreError::Validation(format!("content: {e}")))?;
        }
        _ => {}
    }
    if let Some(meta) = attachment {
        validate_attachment(config, meta)?;
    }

    let message_id = conclave_util::snowflake::generate(1);
    let row = match messages::append_message(
        db,
        message_id,
        session_id,
        sender_id,
        content,
        message_type.as_str(),
        attachment.map(|a| a.path.as_str()),
        attachment.map(|a| a.mime.as_str()),
        attachment.map(|a| a.size),
    )
    .await?
    {
        AppendOutcome::Applied(row) => row,
        AppendOutcome::SessionEnded => return Err(CoreError::SessionEnded),
        AppendOutcome::SessionNotFound => return Err(CoreError::NotFound),
        AppendOutcome::SenderNotActive => return Err(CoreError::Forbidden),
    };

    events.dispatch(EVENT_MESSAGE_CREATE, message_json(&row), session_id);
    Ok(row)
}

/// The attachment store lives outside this service; the log only accepts a
/// reference after its declared size and MIME pass the configured bounds.
fn validate_attachment(config: &AppConfig, meta: &AttachmentMeta) -> Result<(), CoreError> {
    if meta.path.trim().is_empty() {
        return Err(CoreError::Validation("attachment path is empty".into()));
    }
    if meta.mime.trim().is_empty() || !meta.mime.contains('/') {
        return Err(CoreError::Validation(format!(
            "invalid attachment MIME '{}'",
            meta.mime
        )));
    }
    if meta.size <= 0 || meta.size > config.max_attachment_size {
        return Err(CoreError::Validation(format!(
            "attachment size {} out of bounds (max {})",
            meta.size, config.max_attachment_size
        )));
    }
    Ok(())
}

/// Catch-up listing in creation order, resumable from the last seen id.
/// History stays readable after the session ends.
pub async fn list_messages(
    db: &DbPool,
    session_id: i64,
    requester_id: i64,
    after: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRow>, CoreError> {
    session::get_session(db, session_id).await?;
    gate::ensure_subscriber(db, session_id, requester_id).await?;
    Ok(messages::list_messages(db, session_id, after, limit).await?)
}

/// Moderation removal by the creator or an admin. Leaves a gap in the id
/// sequence rather than renumbering.
pub async fn moderate_delete(
    db: &DbPool,
    events: &EventBus,
    session_id: i64,
    message_id: i64,
    actor_id: i64,
    actor_is_admin: bool,
) -> Result<(), CoreError> {
    let session = session::get_session(db, session_id).await?;
    if session.creator_id != actor_id && !actor_is_admin {
        return Err(CoreError::Forbidden);
    }

    let message = messages::get_message(db, message_id)
        .await?
        .filter(|m| m.session_id == session_id && !m.deleted)
        .ok_or(CoreError::NotFound)?;

    if messages::mark_deleted(db, message.id).await? {
        events.dispatch(
            EVENT_MESSAGE_DELETE,
            json!({
                "session_id": session_id.to_string(),
                "message_id": message.id.to_string(),
            }),
            session_id,
        );
    }
    Ok(())
}

pub fn message_json(row: &MessageRow) -> serde_json::Value {
    let attachment = row.attachment_path.as_ref().map(|path| {
        json!({
            "path": path,
            "mime": row.attachment_mime,
            "size": row.attachment_size,
        })
    });
    json!({
        "id": row.id.to_string(),
        "session_id": row.session_id.to_string(),
        "author_id": row.author_id.to_string(),
        "content": row.content,
        "message_type": row.message_type,
        "attachment": attachment,
        "created_at": row.created_at.to_rfc3339(),
    })
}
