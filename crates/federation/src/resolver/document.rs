//! Remote actor documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parts of a remote actor document the engine uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActor {
    /// Actor's `ActivityPub` ID (URL)
    pub id: String,
    /// Actor type (Person, Service, etc.)
    pub actor_type: String,
    pub preferred_username: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub followers: Option<String>,
    pub public_key_id: Option<String>,
    pub public_key_pem: Option<String>,
    /// Avatar
    pub icon: Option<String>,
    /// Header/banner image
    pub image: Option<String>,
    pub manually_approves_followers: bool,
    pub host: String,
}

impl RemoteActor {
    /// Parse an actor document. Returns `None` when a required field is absent.
    #[must_use]
    pub fn from_json(json: &Value) -> Option<Self> {
        let id = json.get("id")?.as_str()?.to_string();
        let host = url::Url::parse(&id).ok()?.host_str()?.to_string();
        let (public_key_id, public_key_pem) = match extract_public_key(json, None) {
            Some((key_id, pem)) => (Some(key_id), Some(pem)),
            None => (None, None),
        };

        Some(Self {
            actor_type: json.get("type")?.as_str()?.to_string(),
            preferred_username: json.get("preferredUsername")?.as_str()?.to_string(),
            name: string_field(json, "name"),
            summary: string_field(json, "summary"),
            inbox: json.get("inbox")?.as_str()?.to_string(),
            shared_inbox: json
                .get("endpoints")
                .and_then(|e| e.get("sharedInbox"))
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| string_field(json, "sharedInbox")),
            followers: string_field(json, "followers"),
            public_key_id,
            public_key_pem,
            icon: json.get("icon").and_then(image_url),
            image: json.get("image").and_then(image_url),
            manually_approves_followers: json
                .get("manuallyApprovesFollowers")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            host,
            id,
        })
    }
}

/// Find a public key in an actor or key document.
///
/// `publicKey` may be a single object or an array; when `key_id` is given
/// the entry with that id wins, otherwise the first entry is used. A bare key
/// document (top-level `publicKeyPem`) is accepted too.
#[must_use]
pub fn extract_public_key(json: &Value, key_id: Option<&str>) -> Option<(String, String)> {
    if let Some(pem) = json.get("publicKeyPem").and_then(Value::as_str) {
        let id = json.get("id").and_then(Value::as_str)?;
        return Some((id.to_string(), pem.to_string()));
    }

    let keys: Vec<&Value> = match json.get("publicKey")? {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    let pick = |k: &&&Value| {
        key_id.is_none_or(|wanted| k.get("id").and_then(Value::as_str) == Some(wanted))
    };
    let key = keys.iter().find(pick).or_else(|| keys.first())?;

    Some((
        key.get("id")?.as_str()?.to_string(),
        key.get("publicKeyPem")?.as_str()?.to_string(),
    ))
}

fn string_field(json: &Value, name: &str) -> Option<String> {
    json.get(name).and_then(Value::as_str).map(String::from)
}

fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => Some(url.clone()),
        Value::Object(_) => value.get("url").and_then(Value::as_str).map(String::from),
        Value::Array(items) => items.first().and_then(image_url),
        _ => None,
    }
}
