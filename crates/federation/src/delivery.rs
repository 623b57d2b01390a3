//! Outbound delivery contract.
//!
//! Handlers and other callers hand finished activities to an
//! [`ActivityDelivery`]; the queue crate provides the real implementation.

use std::sync::Arc;

use async_trait::async_trait;
use fedi_common::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::activity::ActivityKind;

/// Scheduling tier of a delivery, highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPriority {
    /// Interactive actions a user is waiting on
    Urgent,
    #[default]
    Normal,
    /// Cleanup that can wait
    Low,
}

impl DeliveryPriority {
    pub const ALL: [Self; 3] = [Self::Urgent, Self::Normal, Self::Low];

    #[must_use]
    pub const fn for_kind(kind: &ActivityKind) -> Self {
        match kind {
            ActivityKind::Follow
            | ActivityKind::Accept
            | ActivityKind::Reject
            | ActivityKind::Undo => Self::Urgent,
            ActivityKind::Update | ActivityKind::Delete => Self::Low,
            _ => Self::Normal,
        }
    }

    /// Tier for a serialized activity, read from its `type`.
    #[must_use]
    pub fn for_activity(activity: &Value) -> Self {
        activity
            .get("type")
            .and_then(Value::as_str)
            .map_or(Self::Normal, |t| Self::for_kind(&ActivityKind::parse(t)))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for DeliveryPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queues activities for delivery to remote inboxes.
///
/// Implementations never report remote failures to the caller; an `Err`
/// only means the activity could not be handed to the queue at all.
#[async_trait]
pub trait ActivityDelivery: Send + Sync {
    /// Queue `activity`, signed as `user_id`, for each inbox.
    async fn deliver(&self, user_id: &str, activity: Value, inboxes: Vec<String>)
    -> AppResult<()>;

    /// Queue `activity` for a single inbox.
    async fn deliver_to(&self, user_id: &str, activity: Value, inbox: &str) -> AppResult<()> {
        self.deliver(user_id, activity, vec![inbox.to_string()])
            .await
    }
}

/// Delivery that discards everything. For setups without federation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDelivery;

#[async_trait]
impl ActivityDelivery for NoOpDelivery {
    async fn deliver(
        &self,
        _user_id: &str,
        _activity: Value,
        _inboxes: Vec<String>,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Shared delivery handle.
pub type DeliveryService = Arc<dyn ActivityDelivery>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_tiers() {
        for kind in ["Follow", "Accept", "Reject", "Undo"] {
            assert_eq!(
                DeliveryPriority::for_activity(&json!({ "type": kind })),
                DeliveryPriority::Urgent
            );
        }
        for kind in ["Like", "EmojiReact", "Announce", "Create"] {
            assert_eq!(
                DeliveryPriority::for_activity(&json!({ "type": kind })),
                DeliveryPriority::Normal
            );
        }
        for kind in ["Update", "Delete"] {
            assert_eq!(
                DeliveryPriority::for_activity(&json!({ "type": kind })),
                DeliveryPriority::Low
            );
        }
        assert!(DeliveryPriority::Urgent < DeliveryPriority::Low);
    }
}
