//! Error types for the link shortening service.
//!
//! This module defines the central `Error` enum, which captures all recoverable
//! and reportable error cases within linkshrink. It implements
//! `From<Error>` for `tonic::Status` so gRPC handlers can propagate failures
//! with `?` and have them surface with an appropriate status code.
//!
//! ## Error Cases
//! - `LinkNotFound`: No link is stored under the requested short code.
//! - `LinkGone`: The link exists but has been soft-deleted by its owner.
//! - `AlreadyShortened`: The caller already shortened this URL; carries the
//!   existing short code.
//! - `InvalidRequest`: The client request was malformed or empty.
//! - `Unauthenticated`: No caller identity was supplied.
//! - `Storage`: A storage backend failed (I/O, serialization, database).
//! - `Cancelled`: The operation observed a cancelled scope before starting.
//! - `ServiceShutdown`: The deletion pool no longer accepts work.
//! - `Internal`: A background task failed unexpectedly.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for linkshrink.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The short code is unknown.
    #[error("Link not found: {short}")]
    LinkNotFound { short: String },

    /// The short code was soft-deleted.
    #[error("Link deleted: {short}")]
    LinkGone { short: String },

    /// The owner already shortened this origin.
    #[error("Link already shortened as {short}")]
    AlreadyShortened { short: String },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The request carried no caller identity.
    #[error("Missing user identity")]
    Unauthenticated,

    /// A storage backend failed.
    #[error("Storage error: {context}")]
    Storage { context: String },

    /// The cancellation scope fired before the operation started.
    #[error("Operation cancelled")]
    Cancelled,

    /// The deletion pool is closed or shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A background task panicked or was aborted.
    #[error("Internal error: {context}")]
    Internal { context: String },
}

impl Error {
    pub fn storage(context: impl Into<String>) -> Self {
        Self::Storage {
            context: context.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::storage(format!("I/O: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(format!("JSON: {err}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(format!("database: {err}"))
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::LinkNotFound { short } => Status::not_found(format!("Unknown link {short}")),
            Error::LinkGone { short } => {
                Status::failed_precondition(format!("Link {short} was deleted"))
            }
            Error::AlreadyShortened { short } => {
                Status::already_exists(format!("Already shortened as {short}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Unauthenticated => Status::unauthenticated("Missing x-user-id metadata"),
            Error::Storage { context } => Status::internal(format!("Storage error: {context}")),
            Error::Cancelled => Status::cancelled("Operation was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::Internal { context } => Status::internal(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn maps_errors_to_grpc_codes() {
        let cases = [
            (Error::LinkNotFound { short: "x".into() }, Code::NotFound),
            (Error::LinkGone { short: "x".into() }, Code::FailedPrecondition),
            (
                Error::AlreadyShortened { short: "x".into() },
                Code::AlreadyExists,
            ),
            (Error::invalid("empty"), Code::InvalidArgument),
            (Error::Unauthenticated, Code::Unauthenticated),
            (Error::storage("disk"), Code::Internal),
            (Error::Cancelled, Code::Cancelled),
            (Error::ServiceShutdown, Code::Unavailable),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn io_errors_become_storage_errors() {
        let err: Error = std::io::Error::other("boom").into();
        assert!(matches!(err, Error::Storage { ref context } if context.contains("boom")));
    }
}
