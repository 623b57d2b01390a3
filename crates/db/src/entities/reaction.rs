//! Reaction entity (emoji reactions to notes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,

    /// The user who reacted
    pub user_id: String,

    /// The note being reacted to
    pub note_id: String,

    /// Unicode emoji, or a host-qualified shortcode such as `:blob@remote.example:`
    pub reaction: String,

    /// Id of the Like/EmojiReact activity that created it, if remote
    pub uri: Option<String>,

    pub created_at: DateTime<Utc>,
}
