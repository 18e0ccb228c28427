//! Types and interfaces shared across the LogBull backend.
//!
//! Nothing in this crate talks to the network on its own: the traits here
//! ([`cache::SharedCache`], [`search::SearchBackend`],
//! [`projects::ProjectStore`], …) are the seams where concrete
//! infrastructure is plugged in by the `storage` and `application` crates.

pub mod auth;
pub mod backoff;
pub mod cache;
pub mod errors;
pub mod http;
pub mod knobs;
pub mod projects;
pub mod query;
pub mod runtime;
pub mod search;
pub mod shutdown;
pub mod types;
