//! Shared building blocks for the federation engine.
//!
//! - **Configuration**: layered settings via [`Config`]
//! - **Error handling**: [`AppError`] and [`AppResult`], mapped onto HTTP statuses
//! - **Cryptography**: RSA key generation and PEM parsing
//! - **ID generation**: ULID record ids and activity URIs via [`IdGenerator`]
//! - **Cache**: the [`CacheStore`] contract with Redis and in-process backends

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod id;

pub use cache::{CacheError, CacheStore, LayeredCache, MemoryCache, RedisCache};
pub use config::Config;
pub use crypto::{RsaKeypair, generate_rsa_keypair};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
