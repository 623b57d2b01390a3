//! Ledger of processed inbound activities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub activity_id: String,
    pub received_at: DateTime<Utc>,
}
