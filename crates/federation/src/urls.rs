//! URL layout of local actors, notes and inboxes.

use url::Url;

/// Builds and recognises this instance's `ActivityPub` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUrls {
    base: String,
}

impl LocalUrls {
    /// `base_url` is the public URL of the instance, e.g. `https://local.example`.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn user_uri(&self, user_id: &str) -> String {
        format!("{}/users/{user_id}", self.base)
    }

    #[must_use]
    pub fn user_inbox(&self, user_id: &str) -> String {
        format!("{}/inbox", self.user_uri(user_id))
    }

    #[must_use]
    pub fn followers(&self, user_id: &str) -> String {
        format!("{}/followers", self.user_uri(user_id))
    }

    /// Key id used when signing as a local user.
    #[must_use]
    pub fn key_id(&self, user_id: &str) -> String {
        format!("{}#main-key", self.user_uri(user_id))
    }

    #[must_use]
    pub fn note_uri(&self, note_id: &str) -> String {
        format!("{}/notes/{note_id}", self.base)
    }

    #[must_use]
    pub fn shared_inbox(&self) -> String {
        format!("{}/inbox", self.base)
    }

    /// Whether a URI points at this instance.
    #[must_use]
    pub fn is_local(&self, uri: &str) -> bool {
        uri.strip_prefix(&self.base)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Local user id of an actor URI like `{base}/users/{id}`.
    #[must_use]
    pub fn local_user_id(&self, uri: &str) -> Option<String> {
        self.single_segment(uri, "/users/")
    }

    /// Local note id of a URI like `{base}/notes/{id}`.
    #[must_use]
    pub fn local_note_id(&self, uri: &str) -> Option<String> {
        self.single_segment(uri, "/notes/")
    }

    /// Local user that minted an activity id like `{base}/users/{id}/follow/{uuid}`.
    #[must_use]
    pub fn activity_owner_id(&self, uri: &str) -> Option<String> {
        let rest = uri.strip_prefix(&self.base)?.strip_prefix("/users/")?;
        let id = rest.split(['/', '#', '?']).next()?;
        (!id.is_empty()).then(|| id.to_string())
    }

    fn single_segment(&self, uri: &str, prefix: &str) -> Option<String> {
        let id = uri.strip_prefix(&self.base)?.strip_prefix(prefix)?;
        let id = id.split(['#', '?']).next()?;
        (!id.is_empty() && !id.contains('/')).then(|| id.to_string())
    }
}
