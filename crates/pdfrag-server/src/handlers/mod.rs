pub mod chat;
pub mod documents;
pub mod health;
pub mod tasks;
pub mod upload;
pub mod users;
