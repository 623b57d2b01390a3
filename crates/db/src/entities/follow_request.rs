//! Pending follow request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub follower_id: String,
    pub followee_id: String,

    /// Id of the Follow activity, echoed back in Accept/Reject
    pub activity_uri: Option<String>,

    pub created_at: DateTime<Utc>,
}
