//! Inbound activity envelope.
//!
//! Every activity shares the same outer shape; what differs is the type tag
//! and how `object` is interpreted. Handlers pick the pieces they need out of
//! [`Activity`] instead of each type getting its own struct.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// `ActivityStreams` public collection.
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Activity type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Follow,
    Undo,
    Like,
    EmojiReact,
    Create,
    Update,
    Delete,
    Announce,
    Accept,
    Reject,
    /// Anything this server does not handle.
    Other(String),
}

impl ActivityKind {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "Follow" => Self::Follow,
            "Undo" => Self::Undo,
            "Like" => Self::Like,
            "EmojiReact" => Self::EmojiReact,
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Announce" => Self::Announce,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Follow => "Follow",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::EmojiReact => "EmojiReact",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Announce => "Announce",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActivityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// A received activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ActivityKind,

    #[serde(deserialize_with = "id_of")]
    pub actor: String,

    /// Nested activity, embedded object or bare URI
    #[serde(default)]
    pub object: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(
        rename = "_misskey_reaction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub misskey_reaction: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many_values")]
    pub tag: Vec<Value>,
}

impl Activity {
    /// Parse an activity from a request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// URI of the object, whether it is embedded or referenced.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        object_id(&self.object)
    }

    /// Declared type of an embedded object.
    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        self.object.get("type").and_then(Value::as_str)
    }

    /// The embedded object parsed as an activity (for Undo/Accept/Reject).
    #[must_use]
    pub fn inner_activity(&self) -> Option<Self> {
        if !self.object.is_object() {
            return None;
        }
        serde_json::from_value(self.object.clone()).ok()
    }

    /// Whether the activity is addressed to the public collection.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.to.iter().chain(&self.cc).any(|a| is_public_address(a))
    }
}

/// URI of an object that may be embedded or referenced.
#[must_use]
pub fn object_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) => Some(id),
        Value::Object(_) => value.get("id").and_then(Value::as_str),
        _ => None,
    }
}

/// Recognises the spellings of the public collection seen in the wild.
#[must_use]
pub fn is_public_address(address: &str) -> bool {
    matches!(address, PUBLIC | "as:Public" | "Public")
}

fn id_of<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    object_id(&value)
        .map(String::from)
        .ok_or_else(|| serde::de::Error::custom("actor must be a URI or an object with an id"))
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    })
}

fn one_or_many_values<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_like_with_reaction() {
        let activity: Activity = serde_json::from_value(json!({
            "id": "https://remote.example/likes/1",
            "type": "Like",
            "actor": "https://remote.example/users/x",
            "object": "https://local.example/notes/abc",
            "content": ":blob:",
            "_misskey_reaction": ":blob:",
            "tag": { "type": "Emoji", "name": ":blob:", "icon": { "url": "https://remote.example/blob.png" } }
        }))
        .unwrap();

        assert_eq!(activity.kind, ActivityKind::Like);
        assert_eq!(activity.object_id(), Some("https://local.example/notes/abc"));
        assert_eq!(activity.misskey_reaction.as_deref(), Some(":blob:"));
        assert_eq!(activity.tag.len(), 1);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let activity: Activity = serde_json::from_value(json!({
            "id": "https://remote.example/a/1",
            "type": "Move",
            "actor": { "id": "https://remote.example/users/x" },
            "object": "https://remote.example/users/x"
        }))
        .unwrap();

        assert_eq!(activity.kind, ActivityKind::Other("Move".into()));
        assert_eq!(activity.actor, "https://remote.example/users/x");
    }

    #[test]
    fn test_inner_activity_and_addressing() {
        let activity: Activity = serde_json::from_value(json!({
            "id": "https://remote.example/undo/1",
            "type": "Undo",
            "actor": "https://remote.example/users/x",
            "to": "as:Public",
            "object": {
                "id": "https://remote.example/follow/1",
                "type": "Follow",
                "actor": "https://remote.example/users/x",
                "object": "https://local.example/users/alice"
            }
        }))
        .unwrap();

        let inner = activity.inner_activity().unwrap();
        assert_eq!(inner.kind, ActivityKind::Follow);
        assert_eq!(inner.object_id(), Some("https://local.example/users/alice"));
        assert!(activity.is_public());
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let result: Result<Activity, _> = serde_json::from_value(json!({
            "type": "Like",
            "actor": "https://remote.example/users/x"
        }));
        assert!(result.is_err());
    }
}
