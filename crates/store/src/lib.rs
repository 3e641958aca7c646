//! Persistent-store access for Spark.
//!
//! The core consumes a row-oriented store with per-tenant vector search
//! through the [`SparkStore`] trait; [`RestStore`] is the PostgREST-style
//! implementation. Session lifecycle logic that sits above raw row
//! operations (IP binding, expiry transitions) lives in [`sessions`].

pub mod provider;
pub mod rest;
pub mod sessions;

pub use provider::SparkStore;
pub use rest::RestStore;
pub use sessions::{generate_session_token, resolve_session};
