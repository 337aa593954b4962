pub mod gateway;
pub mod message;
pub mod participant;
pub mod session;
