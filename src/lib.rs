pub mod server;
pub mod storage;
pub mod security;
pub mod token;
pub mod auth;
pub mod uploads;
pub mod events;
pub mod error;
