// Core modules
pub mod api;
pub mod calendar;
pub mod config;
pub mod execution;
pub mod journal;
pub mod models;
pub mod notify;
pub mod screening;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use api::*;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
