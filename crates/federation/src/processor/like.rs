//! Like and `EmojiReact` handler.
//!
//! Misskey sends reactions as `Like` with `_misskey_reaction`; Pleroma and
//! Akkoma send `EmojiReact` with the emoji in `content`. Both end up as a
//! reaction row. Custom emoji are stored as `:name@host:` and their image
//! is remembered in the emoji table.

use async_trait::async_trait;
use chrono::Utc;
use fedi_common::{AppError, AppResult, IdGenerator};
use fedi_db::entities::{emoji, notification, reaction};
use serde_json::Value;
use tracing::{debug, info};

use super::{ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, find_note, notify};
use crate::activity::Activity;

/// Reaction used when a Like carries no content.
pub const DEFAULT_REACTION: &str = "❤️";

/// A reaction as stored, plus the custom emoji it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionToken {
    pub token: String,
    /// (name, host, image URL) of a remote custom emoji
    pub custom: Option<(String, String, String)>,
}

/// Work out the stored reaction for an activity.
///
/// `_misskey_reaction` wins over `content`. A `:name:` shortcode with a
/// matching Emoji tag becomes `:name@host:`, where host is the sender's
/// host (or the image host when the sender's is unknown).
#[must_use]
pub fn reaction_token(activity: &Activity, actor_host: Option<&str>) -> ReactionToken {
    let raw = activity
        .misskey_reaction
        .as_deref()
        .or(activity.content.as_deref())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REACTION);

    let shortcode = raw
        .strip_prefix(':')
        .and_then(|r| r.strip_suffix(':'))
        .filter(|name| !name.is_empty());

    if let Some(shortcode) = shortcode {
        let name = shortcode.split('@').next().unwrap_or(shortcode);
        if let Some(url) = emoji_url(&activity.tag, name) {
            let host = actor_host
                .map(String::from)
                .or_else(|| url::Url::parse(&url).ok()?.host_str().map(String::from));
            if let Some(host) = host {
                return ReactionToken {
                    token: format!(":{name}@{host}:"),
                    custom: Some((name.to_string(), host, url)),
                };
            }
        }
    }

    ReactionToken {
        token: raw.to_string(),
        custom: None,
    }
}

fn emoji_url(tags: &[Value], name: &str) -> Option<String> {
    tags.iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("Emoji"))
        .find(|t| {
            t.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.trim_matches(':') == name)
        })
        .and_then(|t| match t.get("icon")? {
            Value::String(url) => Some(url.clone()),
            icon => icon.get("url").and_then(Value::as_str).map(String::from),
        })
}

/// Handler for Like and `EmojiReact`.
#[derive(Clone)]
pub struct LikeHandler {
    deps: HandlerDeps,
    id_gen: IdGenerator,
}

impl LikeHandler {
    #[must_use]
    pub fn new(deps: &HandlerDeps) -> Self {
        Self {
            deps: deps.clone(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Insert or refresh a remote custom emoji.
    async fn remember_emoji(&self, name: &str, host: &str, url: &str) -> AppResult<()> {
        let emojis = &self.deps.repos.emojis;
        match emojis.find_by_name_and_host(name, Some(host)).await? {
            Some(existing) if existing.url == url => Ok(()),
            Some(existing) => {
                debug!(name = %name, host = %host, "Updating custom emoji URL");
                emojis.update_url(&existing.id, url).await.map(|_| ())
            }
            None => {
                let model = emoji::Model {
                    id: self.id_gen.generate(),
                    name: name.to_string(),
                    host: Some(host.to_string()),
                    url: url.to_string(),
                    created_at: Utc::now(),
                    updated_at: None,
                };
                match emojis.create(model).await {
                    Ok(_) | Err(AppError::Conflict(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl ActivityHandler for LikeHandler {
    async fn handle(&self, activity: &Activity, ctx: &HandlerContext) -> AppResult<HandlerOutcome> {
        info!(
            actor = %activity.actor,
            kind = %activity.kind,
            object = ?activity.object_id(),
            "Processing reaction activity"
        );

        let object = activity
            .object_id()
            .ok_or_else(|| AppError::BadRequest("Reaction without object".to_string()))?;
        let note = find_note(&self.deps, object)
            .await?
            .ok_or_else(|| AppError::NoteNotFound(object.to_string()))?;

        let reaction = reaction_token(activity, ctx.actor.host.as_deref());
        if let Some((name, host, url)) = &reaction.custom {
            self.remember_emoji(name, host, url).await?;
        }

        let reactions = &self.deps.repos.reactions;
        if reactions
            .find_by_user_note_and_reaction(&ctx.actor.id, &note.id, &reaction.token)
            .await?
            .is_some()
        {
            return Ok(HandlerOutcome::noop("Reaction already exists"));
        }

        let model = reaction::Model {
            id: self.id_gen.generate(),
            user_id: ctx.actor.id.clone(),
            note_id: note.id.clone(),
            reaction: reaction.token.clone(),
            uri: Some(activity.id.clone()),
            created_at: Utc::now(),
        };
        match reactions.create(model).await {
            Ok(created) => {
                info!(
                    reaction_id = %created.id,
                    note = %note.id,
                    reaction = %created.reaction,
                    "Created reaction"
                );
            }
            // A concurrent delivery of the same reaction won.
            Err(AppError::Conflict(_)) => {
                return Ok(HandlerOutcome::noop("Reaction already exists"));
            }
            Err(e) => return Err(e),
        }

        notify(
            &self.deps,
            &note.user_id,
            &ctx.actor.id,
            notification::Kind::Reaction,
            Some(&note.id),
            Some(&reaction.token),
        )
        .await;

        Ok(HandlerOutcome::applied(format!("Reacted with {}", reaction.token)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn like(extra: &Value) -> Activity {
        let mut value = json!({
            "id": "https://remote.example/likes/1",
            "type": "Like",
            "actor": "https://remote.example/users/x",
            "object": "https://local.example/notes/n1"
        });
        for (k, v) in extra.as_object().unwrap() {
            value[k] = v.clone();
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_plain_like_defaults_to_heart() {
        let token = reaction_token(&like(&json!({})), Some("remote.example"));
        assert_eq!(token.token, DEFAULT_REACTION);
        assert!(token.custom.is_none());
    }

    #[test]
    fn test_unicode_reaction_passes_through() {
        let token = reaction_token(&like(&json!({ "content": "👍" })), Some("remote.example"));
        assert_eq!(token.token, "👍");
    }

    #[test]
    fn test_misskey_reaction_wins_over_content() {
        let token = reaction_token(
            &like(&json!({ "content": "⭐", "_misskey_reaction": "🎉" })),
            None,
        );
        assert_eq!(token.token, "🎉");
    }

    #[test]
    fn test_custom_emoji_is_host_qualified() {
        let activity = like(&json!({
            "_misskey_reaction": ":blob:",
            "tag": [{
                "type": "Emoji",
                "name": ":blob:",
                "icon": { "type": "Image", "url": "https://remote.example/emoji/blob.png" }
            }]
        }));
        let token = reaction_token(&activity, Some("remote.example"));

        assert_eq!(token.token, ":blob@remote.example:");
        assert_eq!(
            token.custom,
            Some((
                "blob".to_string(),
                "remote.example".to_string(),
                "https://remote.example/emoji/blob.png".to_string()
            ))
        );
    }

    #[test]
    fn test_custom_emoji_without_tag_is_kept_verbatim() {
        let token = reaction_token(&like(&json!({ "content": ":blob:" })), Some("remote.example"));
        assert_eq!(token.token, ":blob:");
        assert!(token.custom.is_none());
    }
}
