//! SQLite storage for processed-batch records.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - The batch record repository, which doubles as the coordinator's sink

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
