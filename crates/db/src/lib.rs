//! Storage contracts for the federation engine.
//!
//! Persistence is an external collaborator: the core consumes the
//! repository traits in [`repositories`] and never a concrete database.
//! In-memory implementations back tests and single-node deployments.

pub mod entities;
pub mod repositories;

pub use repositories::Repositories;
