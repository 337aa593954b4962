use crate::participants::ParticipantRow;
use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub creator_id: i64,
    pub mode: String,
    pub max_participants: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for SessionRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            creator_id: row.try_get("creator_id")?,
            mode: row.try_get("mode")?,
            max_participants: row.try_get("max_participants")?,
            is_active: bool_from_any_row(row, "is_active")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, title, description, creator_id, mode, max_participants, is_active, created_at";

/// Insert the session together with its creator's active participant row.
/// One transaction, so a session can never exist without exactly one
/// creator participant.
pub async fn create_session_with_creator(
    pool: &DbPool,
    id: i64,
    title: &str,
    description: Option<&str>,
    creator_id: i64,
    mode: &str,
    max_participants: i32,
) -> Result<(SessionRow, ParticipantRow), DbError> {
    let now = datetime_to_db_text(Utc::now());
    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, SessionRow>(
        "INSERT INTO sessions (id, title, description, creator_id, mode, max_participants, is_active, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
         RETURNING id, title, description, creator_id, mode, max_participants, is_active, created_at",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(creator_id)
    .bind(mode)
    .bind(max_participants)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    let creator = sqlx::query_as::<_, ParticipantRow>(
        "INSERT INTO participants (session_id, user_id, role, status, joined_at, updated_at)
         VALUES ($1, $2, 'creator', 'active', $3, $3)
         RETURNING session_id, user_id, role, status, joined_at, updated_at",
    )
    .bind(id)
    .bind(creator_id)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((session, creator))
}

pub async fn get_session(pool: &DbPool, id: i64) -> Result<Option<SessionRow>, DbError> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Flip `is_active` off. The `WHERE is_active` guard makes the flip happen
/// exactly once: `None` means the session was already ended (or absent).
pub async fn end_session(pool: &DbPool, id: i64) -> Result<Option<SessionRow>, DbError> {
    let row = sqlx::query_as::<_, SessionRow>(
        "UPDATE sessions SET is_active = FALSE
         WHERE id = $1 AND is_active = TRUE
         RETURNING id, title, description, creator_id, mode, max_participants, is_active, created_at",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SessionFilter {
    pub active_only: bool,
    pub creator_id: Option<i64>,
    /// Restrict to sessions where this user has a participant row.
    pub member_id: Option<i64>,
}

/// Keyset listing ordered by snowflake id descending (creation time order).
/// Restartable: pass the last seen id as `before` to resume.
pub async fn list_sessions(
    pool: &DbPool,
    filter: SessionFilter,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<SessionRow>, DbError> {
    let mut builder = sqlx::QueryBuilder::<sqlx::Any>::new(format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE 1 = 1"
    ));
    if filter.active_only {
        builder.push(" AND is_active = TRUE");
    }
    if let Some(creator_id) = filter.creator_id {
        builder.push(" AND creator_id = ");
        builder.push_bind(creator_id);
    }
    if let Some(member_id) = filter.member_id {
        builder.push(" AND id IN (SELECT session_id FROM participants WHERE user_id = ");
        builder.push_bind(member_id);
        builder.push(")");
    }
    if let Some(before_id) = before {
        builder.push(" AND id < ");
        builder.push_bind(before_id);
    }
    builder.push(" ORDER BY id DESC LIMIT ");
    builder.push_bind(limit);

    let rows = builder
        .build_query_as::<SessionRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
