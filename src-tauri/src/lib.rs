pub mod app;
pub mod config;
pub mod dispatcher;
pub mod formatter;
pub mod gemini;
pub mod imagegen;
pub mod logger;
pub mod models;
pub mod session;
pub mod transcript;
