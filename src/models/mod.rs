pub mod chat;
pub mod conversation;
pub mod events;
pub mod user;
