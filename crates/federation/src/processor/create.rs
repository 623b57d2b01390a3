//! Create handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::entities::note;
use serde_json::Value;
use tracing::{debug, info};

use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note, strip_html};
use crate::activity::{Activity, is_public_address};

/// Object types stored as notes.
pub(crate) const NOTE_TYPES: &[&str] = &["Note", "Question", "Article", "Page"];

/// Handler for Create of notes.
#[derive(Clone)]
pub struct CreateHandler {
    deps: HandlerDeps,
    id_gen: IdGenerator,
}

impl CreateHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            deps: deps.clone(),
            id_gen: IdGenerator::new(),
        }
    }
}

/// Plain text of a remote note: the raw source when the sender shares it,
/// otherwise the HTML content stripped of markup.
pub(crate) fn note_text(object: &Value) -> Option<String> {
    if let Some(raw) = object.get("_misskey_content").and_then(Value::as_str) {
        return Some(raw.to_string());
    }
    if let Some(source) = object
        .get("source")
        .and_then(|s| s.get("content"))
        .and_then(Value::as_str)
    {
        return Some(source.to_string());
    }
    object
        .get("content")
        .and_then(Value::as_str)
        .map(strip_html)
}

fn addresses(object: &Value, field: &str) -> Vec<String> {
    match object.get(field) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Visibility implied by a note's addressing.
pub(crate) fn visibility_of(object: &Value, followers_url: Option<&str>) -> note::Visibility {
    let to = addresses(object, "to");
    let cc = addresses(object, "cc");

    if to.iter().any(|a| is_public_address(a)) {
        note::Visibility::Public
    } else if cc.iter().any(|a| is_public_address(a)) {
        note::Visibility::Home
    } else if followers_url.is_some_and(|f| to.iter().chain(&cc).any(|a| a == f)) {
        note::Visibility::Followers
    } else {
        note::Visibility::Specified
    }
}

fn mentions_of(object: &Value) -> Vec<String> {
    let tags = match object.get("tag") {
        Some(Value::Array(tags)) => tags.iter().collect(),
        Some(tag @ Value::Object(_)) => vec![tag],
        _ => Vec::new(),
    };
    tags.into_iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("Mention"))
        .filter_map(|t| t.get("href").and_then(Value::as_str).map(String::from))
        .collect()
}

#[async_trait]
impl ActivityHandler for CreateHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        let object = &activity.object;
        let object_type = activity.object_type().unwrap_or_default();
        info!(actor = %activity.actor, object_type = %object_type, "Processing Create activity");

        if !NOTE_TYPES.contains(&object_type) {
            return Ok(HandlerOutcome::noop(format!(
                "Create of {object_type} is not supported"
            )));
        }

        let uri = activity
            .object_id()
            .ok_or_else(|| AppError::BadRequest("Created object has no id".to_string()))?;
        let author = object
            .get("attributedTo")
            .and_then(crate::activity::object_id)
            .unwrap_or(activity.actor.as_str());
        if author != ctx.actor_uri() {
            return Err(AppError::Forbidden(format!(
                "{} cannot create notes attributed to {author}",
                ctx.actor_uri()
            )));
        }
        if self.deps.urls().is_local(uri) {
            return Err(AppError::Forbidden(format!("Remote actor cannot create local note {uri}")));
        }

        let notes = &self.deps.repos.notes;
        if notes.find_by_uri(uri).await?.is_some() {
            return Ok(HandlerOutcome::noop("Note already exists"));
        }

        let reply_id = match object.get("inReplyTo").and_then(crate::activity::object_id) {
            Some(parent) => {
                let found = find_note(&self.deps, parent).await?;
                if found.is_none() {
                    debug!(parent = %parent, "Reply target is unknown");
                }
                found.map(|n| n.id)
            }
            None => None,
        };

        let created_at = object
            .get("published")
            .and_then(Value::as_str)
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
            .map_or_else(Utc::now, |p| p.with_timezone(&Utc));

        let model = note::Model {
            id: self.id_gen.generate(),
            user_id: ctx.actor.id.clone(),
            uri: Some(uri.to_string()),
            text: note_text(object),
            cw: object.get("summary").and_then(Value::as_str).map(String::from),
            visibility: visibility_of(object, ctx.actor.followers_url.as_deref()),
            renote_id: None,
            reply_id,
            mentions: mentions_of(object),
            created_at,
            updated_at: None,
            deleted_at: None,
        };

        match notes.create(model).await {
            Ok(created) => {
                info!(note_id = %created.id, uri = %uri, "Created remote note");
                Ok(HandlerOutcome::applied("Note created"))
            }
            Err(AppError::Conflict(_)) => Ok(HandlerOutcome::noop("Note already exists")),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::PUBLIC;
    use serde_json::json;

    #[test]
    fn test_visibility_from_addressing() {
        let followers = "https://remote.example/users/x/followers";

        assert_eq!(
            visibility_of(&json!({ "to": [PUBLIC], "cc": [followers] }), Some(followers)),
            note::Visibility::Public
        );
        assert_eq!(
            visibility_of(&json!({ "to": [followers], "cc": [PUBLIC] }), Some(followers)),
            note::Visibility::Home
        );
        assert_eq!(
            visibility_of(&json!({ "to": followers }), Some(followers)),
            note::Visibility::Followers
        );
        assert_eq!(
            visibility_of(&json!({ "to": ["https://local.example/users/a"] }), Some(followers)),
            note::Visibility::Specified
        );
    }

    #[test]
    fn test_note_text_prefers_raw_source() {
        assert_eq!(
            note_text(&json!({ "content": "<p>a</p>", "_misskey_content": "**a**" })).as_deref(),
            Some("**a**")
        );
        assert_eq!(
            note_text(&json!({ "content": "<p>a &amp; b</p>" })).as_deref(),
            Some("a & b")
        );
    }

    #[test]
    fn test_mentions_from_tags() {
        let object = json!({
            "tag": [
                { "type": "Mention", "href": "https://local.example/users/a", "name": "@a" },
                { "type": "Hashtag", "name": "#x" }
            ]
        });
        assert_eq!(mentions_of(&object), vec!["https://local.example/users/a"]);
    }
}
