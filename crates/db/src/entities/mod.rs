//! Entities consumed by the federation core.

pub mod emoji;
pub mod follow_request;
pub mod following;
pub mod note;
pub mod notification;
pub mod reaction;
pub mod received_activity;
pub mod user;
pub mod user_keypair;
