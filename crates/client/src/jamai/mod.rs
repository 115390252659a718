pub mod client;
pub mod config;
mod idle;

pub use client::JamaiClient;
pub use config::JamaiConfig;
