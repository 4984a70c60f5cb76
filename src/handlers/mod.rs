pub mod admin;
pub mod chat_completions;
pub mod completions;
pub mod health;
pub mod models;
pub mod pipeline;
