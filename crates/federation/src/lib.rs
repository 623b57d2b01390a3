//! `ActivityPub` federation engine.
//!
//! - **Signatures**: draft-cavage HTTP signatures and body digests
//! - **Resolver**: remote actor documents, public keys and failure caching
//! - **Dispatcher**: authenticated, replay-safe inbox processing
//! - **Handlers**: one per activity type, behind [`processor::ActivityHandler`]
//! - **Builder**: outbound activities with Misskey extensions
//! - **Delivery**: the [`delivery::ActivityDelivery`] seam the queue implements
//!
//! Misskey-specific extensions are prefixed with `_misskey_`.

pub mod activity;
pub mod builder;
pub mod client;
pub mod delivery;
pub mod dispatcher;
pub mod handler;
pub mod processor;
pub mod resolver;
pub mod signature;
pub mod urls;

pub use activity::{Activity, ActivityKind, PUBLIC};
pub use builder::ActivityBuilder;
pub use client::{ActorFetch, ApClient, ApClientError};
pub use delivery::{ActivityDelivery, DeliveryPriority, DeliveryService, NoOpDelivery};
pub use dispatcher::{InboundRequest, InboxDispatcher, InboxOutcome};
pub use handler::{FederationState, federation_router};
pub use processor::{
    ActivityHandler, HandlerContext, HandlerDeps, HandlerOutcome, HandlerRegistry,
};
pub use resolver::{
    ActorResolver, FailureKind, PublicKeyCache, RemoteActor, ResolveError, spawn_cache_pruner,
};
pub use signature::HttpSigner;
pub use urls::LocalUrls;
