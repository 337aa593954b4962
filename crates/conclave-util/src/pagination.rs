use serde::{Deserialize, Serialize};

/// Keyset cursor parameters for the message listing. `after` is a snowflake
/// id, so a cursor restarted from the last seen id replays the sequence
/// without gaps or duplicates.
#[derive(Debug, Default, Deserialize)]
pub struct CursorParams {
    pub after: Option<i64>,
    pub limit: Option<u32>,
}

impl CursorParams {
    pub fn limit(&self) -> i64 {
        i64::from(self.limit.unwrap_or(50).clamp(1, 100))
    }
}

#[derive(Debug, Serialize)]
pub struct CursorPage<T: Serialize> {
    pub items: Vec<T>,
    pub has_more: bool,
}
