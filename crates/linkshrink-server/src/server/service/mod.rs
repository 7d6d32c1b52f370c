//! Client-facing front ends.
//!
//! Both front ends share one storage backend and one [`DeletionPool`].
//!
//! ## Structure
//!
//! - [`http`] - axum router (`AppState`, JSON and plain-text routes).
//! - [`handler`] - gRPC service entry point (`ShortenerService`).
//! - [`identity`] - signed-cookie and metadata caller identity.
//!
//! [`DeletionPool`]: crate::server::pool::DeletionPool

pub mod handler;
pub mod http;
pub mod identity;
