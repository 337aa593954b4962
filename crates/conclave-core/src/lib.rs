pub mod auth;
pub mod error;
pub mod events;
pub mod gate;
pub mod message;
pub mod participant;
pub mod session;
pub mod signaling;

use conclave_db::DbPool;
use std::sync::Arc;
use tokio::sync::Notify;

/// Bit flag: user may administer any session (end, remove, moderate).
pub const USER_FLAG_ADMIN: i32 = 1 << 0;

pub fn is_admin(flags: i32) -> bool {
    flags & USER_FLAG_ADMIN != 0
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub registration_enabled: bool,
    /// Upper bound for attachment metadata accepted into the message log.
    /// The bytes themselves live in external storage; this only bounds what
    /// a participant may reference.
    pub max_attachment_size: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub event_bus: events::EventBus,
    pub config: AppConfig,
    pub shutdown: Arc<Notify>,
}
