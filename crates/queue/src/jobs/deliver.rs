//! `ActivityPub` delivery job.

use fedi_federation::DeliveryPriority;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Job to deliver an activity to a remote inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverJob {
    /// The local user signing the activity.
    pub user_id: String,

    /// Target inbox URL.
    pub inbox: String,

    /// Activity JSON to deliver.
    pub activity: serde_json::Value,

    #[serde(default)]
    pub priority: DeliveryPriority,

    /// Stable hash of (activity id, inbox)
    pub dedup_key: String,

    /// Attempts already made.
    #[serde(default)]
    pub attempts: u32,
}

impl DeliverJob {
    /// Create a new deliver job. Priority follows the activity type.
    #[must_use]
    pub fn new(user_id: String, inbox: String, activity: serde_json::Value) -> Self {
        let priority = DeliveryPriority::for_activity(&activity);
        let dedup_key = dedup_key(&activity, &inbox);
        Self {
            user_id,
            inbox,
            activity,
            priority,
            dedup_key,
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Destination hostname, the rate limiter's key.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.inbox)
            .ok()?
            .host_str()
            .map(str::to_lowercase)
    }

    #[must_use]
    pub fn activity_id(&self) -> Option<&str> {
        self.activity.get("id").and_then(serde_json::Value::as_str)
    }

    /// The same job, counting one more attempt.
    #[must_use]
    pub fn next_attempt(mut self) -> Self {
        self.attempts += 1;
        self
    }
}

/// Hex SHA-256 of the activity id and inbox URL.
///
/// Activities without an id are keyed by their serialized body.
#[must_use]
pub fn dedup_key(activity: &serde_json::Value, inbox: &str) -> String {
    let id = activity
        .get("id")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| activity.to_string(), String::from);

    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b"\n");
    hasher.update(inbox.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_follows_activity_type() {
        let follow = DeliverJob::new(
            "u1".into(),
            "https://remote.example/inbox".into(),
            json!({"id": "https://local.example/follows/1", "type": "Follow"}),
        );
        let delete = DeliverJob::new(
            "u1".into(),
            "https://remote.example/inbox".into(),
            json!({"id": "https://local.example/deletes/1", "type": "Delete"}),
        );

        assert_eq!(follow.priority, DeliveryPriority::Urgent);
        assert_eq!(delete.priority, DeliveryPriority::Low);
        assert_eq!(follow.host().as_deref(), Some("remote.example"));
    }

    #[test]
    fn test_dedup_key_depends_on_id_and_inbox() {
        let activity = json!({"id": "https://local.example/likes/1", "type": "Like"});
        let a = dedup_key(&activity, "https://a.example/inbox");
        let b = dedup_key(&activity, "https://b.example/inbox");

        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, dedup_key(&activity, "https://a.example/inbox"));

        let renamed = json!({"id": "https://local.example/likes/1", "type": "Like", "content": "x"});
        assert_eq!(a, dedup_key(&renamed, "https://a.example/inbox"));
    }
}
