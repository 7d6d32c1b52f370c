//! Types shared by every linkshrink component: the unified [`Error`], the
//! link model in [`types`] and the generated gRPC bindings in [`proto`].

pub mod error;
pub mod proto;
pub mod types;

pub use error::{Error, Result};
