//! State management module
//!
//! This module handles everything persisted about a panel's images:
//! - Database connections and queries (library.rs)
//! - Shared data structures (data.rs)

pub mod data;
pub mod library;
