//! Repository contracts and their in-memory implementations.
//!
//! The federation core only talks to storage through these traits. The
//! `InMemory*` types enforce the same uniqueness rules a relational schema
//! would (one reaction per user/note/token, one follow per pair, one ledger
//! row per activity id), which is what lets concurrent handlers stay lock-free.

mod emoji;
mod follow_request;
mod following;
mod note;
mod notification;
mod reaction;
mod received_activity;
mod user;
mod user_keypair;

use std::sync::Arc;

pub use emoji::{EmojiRepository, InMemoryEmojiRepository};
pub use follow_request::{FollowRequestRepository, InMemoryFollowRequestRepository};
pub use following::{FollowingRepository, InMemoryFollowingRepository};
pub use note::{InMemoryNoteRepository, NoteRepository};
pub use notification::{InMemoryNotificationService, NotificationService};
pub use reaction::{InMemoryReactionRepository, ReactionRepository};
pub use received_activity::{InMemoryReceivedActivityRepository, ReceivedActivityRepository};
pub use user::{InMemoryUserRepository, UserRepository};
pub use user_keypair::{InMemoryUserKeypairRepository, UserKeypairRepository};

/// Every repository the federation core needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub keypairs: Arc<dyn UserKeypairRepository>,
    pub notes: Arc<dyn NoteRepository>,
    pub reactions: Arc<dyn ReactionRepository>,
    pub emojis: Arc<dyn EmojiRepository>,
    pub following: Arc<dyn FollowingRepository>,
    pub follow_requests: Arc<dyn FollowRequestRepository>,
    pub notifications: Arc<dyn NotificationService>,
    pub received_activities: Arc<dyn ReceivedActivityRepository>,
}

impl Repositories {
    /// A fresh set of empty in-memory repositories.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::default()),
            keypairs: Arc::new(InMemoryUserKeypairRepository::default()),
            notes: Arc::new(InMemoryNoteRepository::default()),
            reactions: Arc::new(InMemoryReactionRepository::default()),
            emojis: Arc::new(InMemoryEmojiRepository::default()),
            following: Arc::new(InMemoryFollowingRepository::default()),
            follow_requests: Arc::new(InMemoryFollowRequestRepository::default()),
            notifications: Arc::new(InMemoryNotificationService::default()),
            received_activities: Arc::new(InMemoryReceivedActivityRepository::default()),
        }
    }
}
