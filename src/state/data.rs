//! Shared data structures for the image store
//!
//! These structs represent the data model that flows between
//! the database layer and the panel control surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a single uploaded image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique database ID
    pub id: i64,
    /// Filename inside the panel's media directory (e.g., "epd_12.png")
    pub filename: String,
    /// Public URL the request layer hands out for this file
    pub url: String,
    /// Upload time
    pub created_at: DateTime<Utc>,
    /// Whether the image takes part in the slideshow rotation
    pub active: bool,
}

/// Partial update applied by `ImageStore::update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageUpdate {
    pub filename: Option<String>,
    pub url: Option<String>,
    pub active: Option<bool>,
}

impl ImageUpdate {
    pub fn active(active: bool) -> Self {
        Self { active: Some(active), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.url.is_none() && self.active.is_none()
    }
}
