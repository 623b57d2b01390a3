//! Job definitions.

#![allow(missing_docs)]

mod deliver;

pub use deliver::{DeliverJob, dedup_key};
