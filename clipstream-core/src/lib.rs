//! Core types and services for the clipstream ingestion service.
//!
//! This crate carries everything the HTTP/pipeline layer builds on:
//! configuration, error types, logging setup, the data model, the sqlx
//! repositories, the Redis-backed upload-metadata store, the S3 blob store
//! and the catalog writer.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod repository;
pub mod service;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
