//! Clipforge: a media processing orchestrator.
//!
//! Composes the store, engine, supervisor and media collaborators into one
//! process-scoped service with explicit startup and teardown. The HTTP
//! collaborator binds the [`service::Orchestrator`] methods; the push
//! channel is its broadcast subscription.

pub mod service;

pub use service::{Collaborators, Orchestrator};
