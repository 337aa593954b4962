pub mod admin;
pub mod auth;
pub mod messages;
pub mod participants;
pub mod sessions;
pub mod signaling;
