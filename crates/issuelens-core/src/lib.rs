//! Configuration loading, secrets, and wiring of the retrieval engine.

pub mod bootstrap;
pub mod config;
pub mod vault;

pub use bootstrap::AppBuilder;
pub use config::Config;
