pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod tasks;
pub mod worker;
pub mod ytdlp;
