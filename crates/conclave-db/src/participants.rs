use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::AnyConnection;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub session_id: i64,
    pub user_id: i64,
    pub role: String,
    pub status: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ParticipantRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let joined_at_raw: Option<String> = row.try_get("joined_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            status: row.try_get("status")?,
            joined_at: joined_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

const PARTICIPANT_COLUMNS: &str = "session_id, user_id, role, status, joined_at, updated_at";

/// Result of one state-machine transition attempt. The caller decides which
/// variants are errors; `NoOp` carries the row already in the requested
/// state so repeated calls stay idempotent.
#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(ParticipantRow),
    NoOp(ParticipantRow),
    InvalidState(ParticipantRow),
    CapacityExceeded,
    SessionEnded,
    SessionNotFound,
    ParticipantNotFound,
}

/// Serialize transitions per session by taking the session row lock before
/// reading the capacity counters. The self-assignment UPDATE acquires a row
/// lock on PostgreSQL and the write lock on SQLite, so two racing accepts
/// observe each other's committed state.
pub(crate) async fn lock_session(
    conn: &mut AnyConnection,
    session_id: i64,
) -> Result<Option<(i32, bool)>, DbError> {
    sqlx::query("UPDATE sessions SET is_active = is_active WHERE id = $1")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    let row = sqlx::query("SELECT max_participants, is_active FROM sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => {
            let max: i32 = row.try_get("max_participants")?;
            let active = bool_from_any_row(&row, "is_active")?;
            Ok(Some((max, active)))
        }
        None => Ok(None),
    }
}

async fn count_active(conn: &mut AnyConnection, session_id: i64) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM participants WHERE session_id = $1 AND status = 'active'",
    )
    .bind(session_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

async fn get_participant_on(
    conn: &mut AnyConnection,
    session_id: i64,
    user_id: i64,
) -> Result<Option<ParticipantRow>, DbError> {
    let row = sqlx::query_as::<_, ParticipantRow>(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE session_id = $1 AND user_id = $2"
    ))
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get_participant(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<Option<ParticipantRow>, DbError> {
    let mut conn = pool.acquire().await?;
    get_participant_on(&mut *conn, session_id, user_id).await
}

pub async fn list_participants(
    pool: &DbPool,
    session_id: i64,
) -> Result<Vec<ParticipantRow>, DbError> {
    let rows = sqlx::query_as::<_, ParticipantRow>(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE session_id = $1
         ORDER BY role, user_id"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_active_participants(pool: &DbPool, session_id: i64) -> Result<i64, DbError> {
    let mut conn = pool.acquire().await?;
    count_active(&mut *conn, session_id).await
}

/// Create or overwrite the membership row in state `invited`. Re-inviting a
/// removed participant re-enters here. Already invited or active rows are
/// left untouched.
pub async fn invite(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<TransitionOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let Some((max_participants, is_active)) = lock_session(&mut *tx, session_id).await? else {
        return Ok(TransitionOutcome::SessionNotFound);
    };
    if !is_active {
        return Ok(TransitionOutcome::SessionEnded);
    }

    if let Some(existing) = get_participant_on(&mut *tx, session_id, user_id).await? {
        if existing.status == "invited" || existing.status == "active" {
            return Ok(TransitionOutcome::NoOp(existing));
        }
    }

    if count_active(&mut *tx, session_id).await? >= i64::from(max_participants) {
        return Ok(TransitionOutcome::CapacityExceeded);
    }

    let now = datetime_to_db_text(Utc::now());
    let row = sqlx::query_as::<_, ParticipantRow>(
        "INSERT INTO participants (session_id, user_id, role, status, joined_at, updated_at)
         VALUES ($1, $2, 'participant', 'invited', NULL, $3)
         ON CONFLICT (session_id, user_id)
         DO UPDATE SET status = 'invited', updated_at = $3
         RETURNING session_id, user_id, role, status, joined_at, updated_at",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(TransitionOutcome::Applied(row))
}

/// Self-service join request: creates a `pending` row when the user has no
/// membership yet. Idempotent while pending; removed users cannot re-enter
/// this way.
pub async fn request_join(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<TransitionOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let Some((_, is_active)) = lock_session(&mut *tx, session_id).await? else {
        return Ok(TransitionOutcome::SessionNotFound);
    };
    if !is_active {
        return Ok(TransitionOutcome::SessionEnded);
    }

    if let Some(existing) = get_participant_on(&mut *tx, session_id, user_id).await? {
        if existing.status == "removed" {
            return Ok(TransitionOutcome::InvalidState(existing));
        }
        return Ok(TransitionOutcome::NoOp(existing));
    }

    let now = datetime_to_db_text(Utc::now());
    let row = sqlx::query_as::<_, ParticipantRow>(
        "INSERT INTO participants (session_id, user_id, role, status, joined_at, updated_at)
         VALUES ($1, $2, 'participant', 'pending', NULL, $3)
         RETURNING session_id, user_id, role, status, joined_at, updated_at",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(TransitionOutcome::Applied(row))
}

/// Transition `from_status` -> `active` with the capacity re-checked under
/// the session lock. Used by accept (`invited`) and approve (`pending`);
/// two callers racing for the last slot get exactly one `Applied`.
pub async fn activate(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
    from_status: &str,
) -> Result<TransitionOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let Some((max_participants, is_active)) = lock_session(&mut *tx, session_id).await? else {
        return Ok(TransitionOutcome::SessionNotFound);
    };
    if !is_active {
        return Ok(TransitionOutcome::SessionEnded);
    }

    let Some(existing) = get_participant_on(&mut *tx, session_id, user_id).await? else {
        return Ok(TransitionOutcome::ParticipantNotFound);
    };
    if existing.status == "active" {
        return Ok(TransitionOutcome::NoOp(existing));
    }
    if existing.status != from_status {
        return Ok(TransitionOutcome::InvalidState(existing));
    }

    if count_active(&mut *tx, session_id).await? >= i64::from(max_participants) {
        return Ok(TransitionOutcome::CapacityExceeded);
    }

    let now = datetime_to_db_text(Utc::now());
    let row = sqlx::query_as::<_, ParticipantRow>(
        "UPDATE participants SET status = 'active', joined_at = $4, updated_at = $4
         WHERE session_id = $1 AND user_id = $2 AND status = $3
         RETURNING session_id, user_id, role, status, joined_at, updated_at",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(from_status)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(TransitionOutcome::Applied(row))
}

/// Transition to `removed`. `required_status` narrows which states the
/// caller accepts (`active` for leave, `pending` for reject, `None` for a
/// kick from any state). Already-removed rows are a no-op.
pub async fn mark_removed(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
    required_status: Option<&str>,
) -> Result<TransitionOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let Some((_, is_active)) = lock_session(&mut *tx, session_id).await? else {
        return Ok(TransitionOutcome::SessionNotFound);
    };
    if !is_active {
        return Ok(TransitionOutcome::SessionEnded);
    }

    let Some(existing) = get_participant_on(&mut *tx, session_id, user_id).await? else {
        return Ok(TransitionOutcome::ParticipantNotFound);
    };
    if existing.status == "removed" {
        return Ok(TransitionOutcome::NoOp(existing));
    }
    if let Some(required) = required_status {
        if existing.status != required {
            return Ok(TransitionOutcome::InvalidState(existing));
        }
    }

    let now = datetime_to_db_text(Utc::now());
    let row = sqlx::query_as::<_, ParticipantRow>(
        "UPDATE participants SET status = 'removed', updated_at = $3
         WHERE session_id = $1 AND user_id = $2
         RETURNING session_id, user_id, role, status, joined_at, updated_at",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(TransitionOutcome::Applied(row))
}

/// The realtime subscription predicate: active participant or the session
/// creator. One query so REST and the gateway cannot drift apart.
pub async fn subscriber_exists(
    pool: &DbPool,
    session_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions s
         LEFT JOIN participants p ON p.session_id = s.id AND p.user_id = $2
         WHERE s.id = $1 AND (s.creator_id = $2 OR p.status = 'active')",
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
