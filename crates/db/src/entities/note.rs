//! Note entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audience of a note.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    /// Public but kept off the global timeline
    Home,
    Followers,
    /// Only the mentioned users
    Specified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,

    /// Author
    pub user_id: String,

    /// `ActivityPub` id; `None` for local notes
    pub uri: Option<String>,

    pub text: Option<String>,

    /// Content warning
    pub cw: Option<String>,

    pub visibility: Visibility,

    /// Set when this note is a renote (Announce)
    pub renote_id: Option<String>,

    pub reply_id: Option<String>,

    /// Actor URIs of mentioned users
    pub mentions: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Soft delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Whether this note was written on this instance.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.uri.is_none()
    }

    /// Whether this note has been tombstoned.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Partial update of a note.
///
/// `cw: Some(None)` clears the content warning, `cw: None` keeps it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub text: Option<String>,
    pub cw: Option<Option<String>>,
}

impl Changes {
    /// Write the present fields onto `model`.
    pub fn apply(self, model: &mut Model) {
        if let Some(text) = self.text {
            model.text = Some(text);
        }
        if let Some(cw) = self.cw {
            model.cw = cw;
        }
        model.updated_at = Some(Utc::now());
    }
}
