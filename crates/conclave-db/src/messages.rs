use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: i64,
    pub author_id: i64,
    pub content: Option<String>,
    pub message_type: String,
    pub attachment_path: Option<String>,
    pub attachment_mime: Option<String>,
    pub attachment_size: Option<i64>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            author_id: row.try_get("author_id")?,
            content: row.try_get("content")?,
            message_type: row.try_get("message_type")?,
            attachment_path: row.try_get("attachment_path")?,
            attachment_mime: row.try_get("attachment_mime")?,
            attachment_size: row.try_get("attachment_size")?,
            deleted: bool_from_any_row(row, "deleted")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, session_id, author_id, content, message_type, \
     attachment_path, attachment_mime, attachment_size, deleted, created_at";

/// Outcome of a guarded append. The insert and its preconditions (session
/// still live, sender still an active participant) are decided under the
/// session row lock, so an append can never land after the end flip or a
/// concurrent removal commits.
#[derive(Debug)]
pub enum AppendOutcome {
    Applied(MessageRow),
    SessionEnded,
    SessionNotFound,
    SenderNotActive,
}

#[allow(clippy::too_many_arguments)]
pub async fn append_message(
    pool: &DbPool,
    id: i64,
    session_id: i64,
    author_id: i64,
    content: Option<&str>,
    message_type: &str,
    attachment_path: Option<&str>,
    attachment_mime: Option<&str>,
    attachment_size: Option<i64>,
) -> Result<AppendOutcome, DbError> {
    let mut tx = pool.begin().await?;

    let Some((_, is_active)) = crate::participants::lock_session(&mut *tx, session_id).await? else {
        return Ok(AppendOutcome::SessionNotFound);
    };
    if !is_active {
        return Ok(AppendOutcome::SessionEnded);
    }

    let sender_active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM participants
         WHERE session_id = $1 AND user_id = $2 AND status = 'active'",
    )
    .bind(session_id)
    .bind(author_id)
    .fetch_one(&mut *tx)
    .await?;
    if sender_active == 0 {
        return Ok(AppendOutcome::SenderNotActive);
    }

    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "INSERT INTO messages (id, session_id, author_id, content, message_type,
                               attachment_path, attachment_mime, attachment_size, deleted, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(id)
    .bind(session_id)
    .bind(author_id)
    .bind(content)
    .bind(message_type)
    .bind(attachment_path)
    .bind(attachment_mime)
    .bind(attachment_size)
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(AppendOutcome::Applied(row))
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Messages in creation order (ascending snowflake id), resumable from an
/// `after` cursor. Moderation-deleted rows are skipped; their ids stay
/// burned so the ordering key never renumbers.
pub async fn list_messages(
    pool: &DbPool,
    session_id: i64,
    after: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE session_id = $1 AND deleted = FALSE AND id > $2
         ORDER BY id ASC
         LIMIT $3"
    ))
    .bind(session_id)
    .bind(after.unwrap_or(0))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Moderation removal: flags the row instead of deleting it, leaving a gap
/// in the sequence. Returns false when the message was already flagged.
pub async fn mark_deleted(pool: &DbPool, id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = $1 AND deleted = FALSE")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
