//! Notification entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    Follow,
    FollowRequest,
    FollowAccepted,
    Reaction,
    Renote,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,

    /// Recipient
    pub notifiee_id: String,

    /// Cause
    pub notifier_id: String,

    pub kind: Kind,
    pub note_id: Option<String>,
    pub reaction: Option<String>,
    pub created_at: DateTime<Utc>,
}
