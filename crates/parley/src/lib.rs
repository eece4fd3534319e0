pub mod auth;
pub mod consumer;
pub mod models;
pub mod providers;
pub mod relay;
pub mod stream;
pub mod tools;
