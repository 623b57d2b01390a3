//! Outbound activity construction.
//!
//! [`ActivityBuilder`] is stateless apart from the instance URL layout: it
//! turns users, notes and reactions into the JSON that gets signed and
//! POSTed. Nothing here touches storage or the network.

use fedi_common::IdGenerator;
use fedi_db::entities::{note, user};
use serde_json::{Value, json};

use crate::activity::PUBLIC;
use crate::urls::LocalUrls;

/// Source media type advertised next to raw note text.
pub const MFM_MEDIA_TYPE: &str = "text/x.misskey.mfm";

/// A mentioned actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Actor URI
    pub href: String,
    /// `@user@host`
    pub name: String,
}

/// A custom emoji referenced from content or a reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEmoji {
    /// Shortcode without colons
    pub name: String,
    pub url: String,
}

fn context() -> Value {
    json!([
        "https://www.w3.org/ns/activitystreams",
        "https://w3id.org/security/v1",
        {
            "misskey": "https://misskey-hub.net/ns#",
            "_misskey_content": "misskey:_misskey_content",
            "_misskey_reaction": "misskey:_misskey_reaction",
            "Emoji": "toot:Emoji",
            "toot": "http://joinmastodon.org/ns#",
            "sensitive": "as:sensitive",
            "manuallyApprovesFollowers": "as:manuallyApprovesFollowers"
        }
    ])
}

/// HTML-escape plain text and turn newlines into line breaks.
#[must_use]
pub fn text_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 7);
    out.push_str("<p>");
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br>"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out.push_str("</p>");
    out
}

/// Image media type guessed from a URL's file extension.
#[must_use]
pub fn media_type_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "apng" => "image/apng",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

/// Builds outbound activities.
#[derive(Debug, Clone)]
pub struct ActivityBuilder {
    urls: LocalUrls,
    id_gen: IdGenerator,
}

impl ActivityBuilder {
    #[must_use]
    pub const fn new(urls: LocalUrls) -> Self {
        Self {
            urls,
            id_gen: IdGenerator::new(),
        }
    }

    #[must_use]
    pub const fn urls(&self) -> &LocalUrls {
        &self.urls
    }

    /// `ActivityPub` id of any user, local or remote.
    #[must_use]
    pub fn actor_uri(&self, user: &user::Model) -> String {
        user.uri
            .clone()
            .unwrap_or_else(|| self.urls.user_uri(&user.id))
    }

    /// `ActivityPub` id of any note, local or remote.
    #[must_use]
    pub fn note_uri(&self, note: &note::Model) -> String {
        note.uri
            .clone()
            .unwrap_or_else(|| self.urls.note_uri(&note.id))
    }

    /// `to`/`cc` for a note by one of our users.
    ///
    /// Mentioned actors always receive the note; for `Specified` notes they
    /// are the only recipients.
    #[must_use]
    pub fn addressing(
        &self,
        author_id: &str,
        visibility: note::Visibility,
        mentions: &[Mention],
    ) -> (Vec<String>, Vec<String>) {
        let followers = self.urls.followers(author_id);
        let mentioned = mentions.iter().map(|m| m.href.clone());

        match visibility {
            note::Visibility::Public => (
                vec![PUBLIC.to_string()],
                std::iter::once(followers).chain(mentioned).collect(),
            ),
            note::Visibility::Home => (
                vec![followers],
                std::iter::once(PUBLIC.to_string()).chain(mentioned).collect(),
            ),
            note::Visibility::Followers => (vec![followers], mentioned.collect()),
            note::Visibility::Specified => (mentioned.collect(), Vec::new()),
        }
    }

    /// Note object for Create/Update.
    #[must_use]
    pub fn note_object(
        &self,
        note: &note::Model,
        author: &user::Model,
        mentions: &[Mention],
        emojis: &[CustomEmoji],
    ) -> Value {
        let (to, cc) = self.addressing(&author.id, note.visibility, mentions);
        let text = note.text.as_deref().unwrap_or_default();

        let mut tags: Vec<Value> = mentions
            .iter()
            .map(|m| json!({ "type": "Mention", "href": m.href, "name": m.name }))
            .collect();
        tags.extend(emojis.iter().map(emoji_tag));

        let mut object = json!({
            "id": self.note_uri(note),
            "type": "Note",
            "attributedTo": self.actor_uri(author),
            "content": text_to_html(text),
            "_misskey_content": text,
            "source": { "content": text, "mediaType": MFM_MEDIA_TYPE },
            "published": note.created_at.to_rfc3339(),
            "to": to,
            "cc": cc,
            "tag": tags,
        });
        if let Some(cw) = &note.cw {
            object["summary"] = json!(cw);
        }
        if let Some(updated) = note.updated_at {
            object["updated"] = json!(updated.to_rfc3339());
        }
        object
    }

    #[must_use]
    pub fn create(
        &self,
        note: &note::Model,
        author: &user::Model,
        mentions: &[Mention],
        emojis: &[CustomEmoji],
    ) -> Value {
        let object = self.note_object(note, author, mentions, emojis);
        json!({
            "@context": context(),
            "id": format!("{}/activity", self.note_uri(note)),
            "type": "Create",
            "actor": self.actor_uri(author),
            "published": note.created_at.to_rfc3339(),
            "to": object["to"].clone(),
            "cc": object["cc"].clone(),
            "object": object,
        })
    }

    #[must_use]
    pub fn update_note(
        &self,
        note: &note::Model,
        author: &user::Model,
        mentions: &[Mention],
        emojis: &[CustomEmoji],
    ) -> Value {
        let actor = self.actor_uri(author);
        let object = self.note_object(note, author, mentions, emojis);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "update"),
            "type": "Update",
            "actor": actor,
            "to": object["to"].clone(),
            "cc": object["cc"].clone(),
            "object": object,
        })
    }

    /// Actor document of a local user.
    #[must_use]
    pub fn person(&self, user: &user::Model, public_key_pem: &str) -> Value {
        let actor = self.actor_uri(user);
        let mut person = json!({
            "@context": context(),
            "id": actor,
            "type": "Person",
            "preferredUsername": user.username,
            "inbox": self.urls.user_inbox(&user.id),
            "followers": self.urls.followers(&user.id),
            "endpoints": { "sharedInbox": self.urls.shared_inbox() },
            "manuallyApprovesFollowers": user.is_locked,
            "publicKey": {
                "id": self.urls.key_id(&user.id),
                "owner": actor,
                "publicKeyPem": public_key_pem,
            },
        });
        if let Some(name) = &user.name {
            person["name"] = json!(name);
        }
        if let Some(description) = &user.description {
            person["summary"] = json!(text_to_html(description));
            person["_misskey_summary"] = json!(description);
        }
        if let Some(avatar) = &user.avatar_url {
            person["icon"] = json!({ "type": "Image", "url": avatar });
        }
        if let Some(banner) = &user.banner_url {
            person["image"] = json!({ "type": "Image", "url": banner });
        }
        person
    }

    /// Profile update of a local user, announced to followers.
    #[must_use]
    pub fn update_actor(&self, user: &user::Model, public_key_pem: &str) -> Value {
        let actor = self.actor_uri(user);
        let mut person = self.person(user, public_key_pem);
        if let Some(object) = person.as_object_mut() {
            object.remove("@context");
        }

        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "update"),
            "type": "Update",
            "actor": actor,
            "to": [PUBLIC],
            "cc": [self.urls.followers(&user.id)],
            "object": person,
        })
    }

    #[must_use]
    pub fn delete(&self, note: &note::Model, author: &user::Model) -> Value {
        let actor = self.actor_uri(author);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "delete"),
            "type": "Delete",
            "actor": actor,
            "to": [PUBLIC],
            "cc": [self.urls.followers(&author.id)],
            "object": { "id": self.note_uri(note), "type": "Tombstone" },
        })
    }

    #[must_use]
    pub fn follow(&self, follower: &user::Model, followee: &user::Model) -> Value {
        let actor = self.actor_uri(follower);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "follow"),
            "type": "Follow",
            "actor": actor,
            "object": self.actor_uri(followee),
        })
    }

    /// Accept a received Follow. `follow` is the Follow as received.
    #[must_use]
    pub fn accept(&self, followee: &user::Model, follow: Value) -> Value {
        self.respond("Accept", followee, follow)
    }

    /// Reject a received Follow.
    #[must_use]
    pub fn reject(&self, followee: &user::Model, follow: Value) -> Value {
        self.respond("Reject", followee, follow)
    }

    fn respond(&self, kind: &str, followee: &user::Model, follow: Value) -> Value {
        let actor = self.actor_uri(followee);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, kind),
            "type": kind,
            "actor": actor,
            "object": follow,
        })
    }

    /// Undo a previously sent activity.
    #[must_use]
    pub fn undo(&self, actor: &user::Model, activity: Value) -> Value {
        let actor = self.actor_uri(actor);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "undo"),
            "type": "Undo",
            "actor": actor,
            "object": activity,
        })
    }

    /// Reaction to a note.
    ///
    /// The reaction goes out both as `content` and `_misskey_reaction`;
    /// a custom emoji reaction also carries its Emoji tag.
    #[must_use]
    pub fn like(
        &self,
        user: &user::Model,
        note: &note::Model,
        reaction: &str,
        emoji: Option<&CustomEmoji>,
    ) -> Value {
        let actor = self.actor_uri(user);
        let mut like = json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "like"),
            "type": "Like",
            "actor": actor,
            "object": self.note_uri(note),
            "content": reaction,
            "_misskey_reaction": reaction,
        });
        if let Some(emoji) = emoji {
            like["tag"] = json!([emoji_tag(emoji)]);
        }
        like
    }

    #[must_use]
    pub fn announce(
        &self,
        user: &user::Model,
        note: &note::Model,
        visibility: note::Visibility,
    ) -> Value {
        let actor = self.actor_uri(user);
        let (to, cc) = self.addressing(&user.id, visibility, &[]);
        json!({
            "@context": context(),
            "id": self.id_gen.activity_uri(&actor, "announce"),
            "type": "Announce",
            "actor": actor,
            "published": chrono::Utc::now().to_rfc3339(),
            "to": to,
            "cc": cc,
            "object": self.note_uri(note),
        })
    }
}

fn emoji_tag(emoji: &CustomEmoji) -> Value {
    json!({
        "id": emoji.url,
        "type": "Emoji",
        "name": format!(":{}:", emoji.name),
        "icon": {
            "type": "Image",
            "mediaType": media_type_from_url(&emoji.url),
            "url": emoji.url,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn builder() -> ActivityBuilder {
        ActivityBuilder::new(LocalUrls::new("https://local.example").unwrap())
    }

    fn note(visibility: note::Visibility, text: &str) -> note::Model {
        note::Model {
            id: "n1".into(),
            user_id: "alice".into(),
            uri: None,
            text: Some(text.into()),
            cw: None,
            visibility,
            renote_id: None,
            reply_id: None,
            mentions: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_escaping_keeps_raw_source() {
        let builder = builder();
        let author = user::Model::local("alice", "alice");
        let create = builder.create(
            &note(note::Visibility::Public, "a < b\n& c"),
            &author,
            &[],
            &[],
        );

        let object = &create["object"];
        assert_eq!(object["content"], "<p>a &lt; b<br>&amp; c</p>");
        assert_eq!(object["_misskey_content"], "a < b\n& c");
        assert_eq!(object["source"]["content"], "a < b\n& c");
        assert_eq!(create["to"], json!([PUBLIC]));
        assert_eq!(
            create["cc"],
            json!(["https://local.example/users/alice/followers"])
        );
    }

    #[test]
    fn test_specified_note_addresses_only_mentions() {
        let builder = builder();
        let mention = Mention {
            href: "https://remote.example/users/bob".into(),
            name: "@bob@remote.example".into(),
        };
        let object = builder.note_object(
            &note(note::Visibility::Specified, "hi"),
            &user::Model::local("alice", "alice"),
            std::slice::from_ref(&mention),
            &[],
        );

        assert_eq!(object["to"], json!(["https://remote.example/users/bob"]));
        assert_eq!(object["cc"], json!([]));
        assert_eq!(object["tag"][0]["type"], "Mention");
        assert_eq!(object["tag"][0]["name"], "@bob@remote.example");
    }

    #[test]
    fn test_like_carries_reaction_twice_and_emoji_tag() {
        let builder = builder();
        let emoji = CustomEmoji {
            name: "blob".into(),
            url: "https://local.example/files/blob.webp?v=2".into(),
        };
        let like = builder.like(
            &user::Model::local("alice", "alice"),
            &note(note::Visibility::Public, "x"),
            ":blob:",
            Some(&emoji),
        );

        assert_eq!(like["content"], ":blob:");
        assert_eq!(like["_misskey_reaction"], ":blob:");
        assert_eq!(like["tag"][0]["name"], ":blob:");
        assert_eq!(like["tag"][0]["icon"]["mediaType"], "image/webp");
        assert!(
            like["id"]
                .as_str()
                .unwrap()
                .starts_with("https://local.example/users/alice/like/")
        );
    }

    #[test]
    fn test_accept_embeds_follow() {
        let builder = builder();
        let follow = json!({
            "id": "https://remote.example/follows/1",
            "type": "Follow",
            "actor": "https://remote.example/users/bob",
            "object": "https://local.example/users/alice"
        });
        let accept = builder.accept(&user::Model::local("alice", "alice"), follow.clone());

        assert_eq!(accept["type"], "Accept");
        assert_eq!(accept["actor"], "https://local.example/users/alice");
        assert_eq!(accept["object"], follow);
    }

    #[test]
    fn test_person_exposes_key() {
        let builder = builder();
        let mut alice = user::Model::local("alice", "alice");
        alice.name = Some("Alice".into());
        let update = builder.update_actor(&alice, "PEM");

        let person = &update["object"];
        assert_eq!(person["publicKey"]["id"], "https://local.example/users/alice#main-key");
        assert_eq!(person["publicKey"]["publicKeyPem"], "PEM");
        assert_eq!(person["inbox"], "https://local.example/users/alice/inbox");
        assert!(person.get("@context").is_none());
        assert_eq!(update["cc"], json!(["https://local.example/users/alice/followers"]));
    }

    #[test]
    fn test_media_types() {
        assert_eq!(media_type_from_url("https://x/e.PNG"), "image/png");
        assert_eq!(media_type_from_url("https://x/e.jpeg"), "image/jpeg");
        assert_eq!(media_type_from_url("https://x/e.gif#frag"), "image/gif");
        assert_eq!(media_type_from_url("https://x/e.svg"), "image/svg+xml");
    }
}
