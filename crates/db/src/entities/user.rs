//! User entity: local accounts and remote actors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,

    pub username: String,

    /// `None` = local user, `Some(host)` = remote user
    pub host: Option<String>,

    /// `ActivityPub` id (remote users only)
    pub uri: Option<String>,

    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub followers_url: Option<String>,

    /// Display name
    pub name: Option<String>,

    /// Profile description
    pub description: Option<String>,

    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,

    pub public_key_id: Option<String>,
    pub public_key_pem: Option<String>,

    /// Follow requests need manual approval
    pub is_locked: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Whether this user lives on this instance.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.host.is_none()
    }

    /// A local user with no federation metadata.
    #[must_use]
    pub fn local(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            host: None,
            uri: None,
            inbox: None,
            shared_inbox: None,
            followers_url: None,
            name: None,
            description: None,
            avatar_url: None,
            banner_url: None,
            public_key_id: None,
            public_key_pem: None,
            is_locked: false,
            created_at: Utc::now(),
            updated_at: None,
            last_fetched_at: None,
        }
    }
}

/// Partial update of a user. `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub followers_url: Option<String>,
    pub public_key_id: Option<String>,
    pub public_key_pem: Option<String>,
    pub is_locked: Option<bool>,
}

impl Changes {
    /// Whether applying these changes would be a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Write the present fields onto `model`.
    pub fn apply(self, model: &mut Model) {
        if let Some(v) = self.name {
            model.name = Some(v);
        }
        if let Some(v) = self.description {
            model.description = Some(v);
        }
        if let Some(v) = self.avatar_url {
            model.avatar_url = Some(v);
        }
        if let Some(v) = self.banner_url {
            model.banner_url = Some(v);
        }
        if let Some(v) = self.inbox {
            model.inbox = Some(v);
        }
        if let Some(v) = self.shared_inbox {
            model.shared_inbox = Some(v);
        }
        if let Some(v) = self.followers_url {
            model.followers_url = Some(v);
        }
        if let Some(v) = self.public_key_id {
            model.public_key_id = Some(v);
        }
        if let Some(v) = self.public_key_pem {
            model.public_key_pem = Some(v);
        }
        if let Some(v) = self.is_locked {
            model.is_locked = v;
        }
        model.updated_at = Some(Utc::now());
    }
}
