//! Custom emoji entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Custom emoji, unique per (name, host).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,

    /// Shortcode without colons (e.g. `blobcat`)
    pub name: String,

    /// Origin host; `None` for local emojis
    pub host: Option<String>,

    /// Image URL
    pub url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}
