//! ID generation for local records and outbound activities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a lowercase ULID, sortable by creation time.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Build a fresh activity URI under an actor, e.g.
    /// `https://local.example/users/abc/follow/01hx...`.
    #[must_use]
    pub fn activity_uri(&self, actor_uri: &str, kind: &str) -> String {
        format!(
            "{}/{}/{}",
            actor_uri.trim_end_matches('/'),
            kind.to_lowercase(),
            Uuid::now_v7()
        )
    }
}
