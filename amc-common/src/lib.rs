//! # AMC Common Library
//!
//! Shared code for the album classifier crates:
//! - Error type used across crates
//! - Layered configuration loading (defaults, TOML, environment)
//! - SQLite pool initialization and cache schema
//! - Tracing subscriber setup

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
