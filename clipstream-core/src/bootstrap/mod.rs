//! Bootstrap helpers for the binary: configuration loading and connection
//! setup.

pub mod config;
pub mod database;

pub use config::load_config;
pub use database::{init_database, init_redis};
