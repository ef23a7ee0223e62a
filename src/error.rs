//! Error handling for soundtrail.
//!
//! Provides a unified error handling system based on gRPC status codes,
//! with mapping from various underlying errors to appropriate categories.
//!
//! # Error Categories
//!
//! Errors are categorized into standard types that map to HTTP status codes:
//! * Authentication/authorization failures (401, 403)
//! * Resource state (404, 409)
//! * Client errors (400, 429)
//! * Server errors (500, 501, 503)
//! * Timeouts and cancellation (499, 504)
//!
//! The categories the engine leans on most:
//! * [`ErrorKind::Unauthenticated`] - expired or missing credentials; a 401
//!   from the player endpoint, or a refresh attempt without a refresh token
//! * [`ErrorKind::Unavailable`] - transport failures while polling
//! * [`ErrorKind::DeadlineExceeded`] - session hydration or request timeouts
//! * [`ErrorKind::DataLoss`] - corrupt persisted credential state
//!
//! # Example
//!
//! ```rust
//! use soundtrail::error::{Error, ErrorKind, Result};
//!
//! fn lookup_owner(id: Option<&str>) -> Result<&str> {
//!     // Create typed errors
//!     id.ok_or_else(|| Error::not_found("no owner id in local storage"))
//! }
//!
//! assert_eq!(lookup_owner(None).unwrap_err().kind, ErrorKind::NotFound);
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// An error kind paired with its underlying cause.
///
/// The kind is what callers branch on (retry, reauthorize, give up); the
/// boxed cause keeps the detail for logs and error chains.
#[derive(Debug)]
pub struct Error {
    /// Category callers branch on
    pub kind: ErrorKind,

    /// The cause behind it, boxed for type erasure
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Borrows the underlying cause as a concrete type.
    ///
    /// Returns `None` when the cause is of a different type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Result type used throughout soundtrail.
///
/// The standard `Result` with this crate's [`struct@Error`] filled in.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories, following the gRPC status codes.
///
/// Each variant maps to an HTTP status and carries the standard short
/// message; the original definitions live in
/// [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto).
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl Error {
    /// Builds an error from a kind and its underlying cause.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::new(ErrorKind::NotFound, "owner profile not found");
    /// assert_eq!(e.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// The operation was interrupted before it could finish.
    ///
    /// Maps to HTTP 409 Conflict. Dropped connections land here through
    /// the `std::io` conversion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::aborted("poll interrupted");
    /// assert_eq!(e.kind, ErrorKind::Aborted);
    /// ```
    pub fn aborted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Aborted,
            error: error.into(),
        }
    }

    /// Something that must be unique already exists.
    ///
    /// Maps to HTTP 409 Conflict.
    pub fn already_exists<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::AlreadyExists,
            error: error.into(),
        }
    }

    /// The operation was called off before completion, typically at
    /// shutdown.
    ///
    /// Maps to HTTP 499 Client Closed Request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::cancelled("engine shutting down");
    /// assert_eq!(e.kind, ErrorKind::Cancelled);
    /// ```
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Cancelled,
            error: error.into(),
        }
    }

    /// Data is corrupt or gone for good, like a credential record that
    /// no longer decrypts.
    ///
    /// Maps to HTTP 500 Internal Server Error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::data_loss("stored credentials corrupted");
    /// assert_eq!(e.kind, ErrorKind::DataLoss);
    /// ```
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::DataLoss,
            error: error.into(),
        }
    }

    /// A time-bound operation ran out of time.
    ///
    /// Maps to HTTP 504 Gateway Timeout. Network timeouts and the
    /// session hydration ceiling land here.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::deadline_exceeded("session hydration timed out");
    /// assert_eq!(e.kind, ErrorKind::DeadlineExceeded);
    /// ```
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::DeadlineExceeded,
            error: error.into(),
        }
    }

    /// The system is not in a state that allows the operation.
    ///
    /// Maps to HTTP 400 Bad Request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::failed_precondition("must be signed in first");
    /// assert_eq!(e.kind, ErrorKind::FailedPrecondition);
    /// ```
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::FailedPrecondition,
            error: error.into(),
        }
    }

    /// An invariant this crate relies on did not hold.
    ///
    /// Maps to HTTP 500 Internal Server Error.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Internal,
            error: error.into(),
        }
    }

    /// A provided value fails validation.
    ///
    /// Maps to HTTP 400 Bad Request.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::invalid_argument("volume must be between 0 and 100");
    /// assert_eq!(e.kind, ErrorKind::InvalidArgument);
    /// ```
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::InvalidArgument,
            error: error.into(),
        }
    }

    /// A requested resource does not exist.
    ///
    /// Maps to HTTP 404 Not Found.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::NotFound,
            error: error.into(),
        }
    }

    /// A value lies outside its allowed bounds.
    ///
    /// Maps to HTTP 400 Bad Request.
    pub fn out_of_range<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::OutOfRange,
            error: error.into(),
        }
    }

    /// The caller is known but not allowed to do this.
    ///
    /// Maps to HTTP 403 Forbidden.
    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::PermissionDenied,
            error: error.into(),
        }
    }

    /// A rate or resource limit has been hit.
    ///
    /// Maps to HTTP 429 Too Many Requests, which is also how the
    /// provider's throttling responses are reported.
    pub fn resource_exhausted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::ResourceExhausted,
            error: error.into(),
        }
    }

    /// No valid credentials for the operation.
    ///
    /// Maps to HTTP 401 Unauthorized. Raised when:
    /// * An access token has expired
    /// * No refresh token is available
    /// * The accounts service rejects a refresh
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::unauthenticated("no refresh token available");
    /// assert_eq!(e.kind, ErrorKind::Unauthenticated);
    /// ```
    pub fn unauthenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unauthenticated,
            error: error.into(),
        }
    }

    /// A service cannot be reached right now.
    ///
    /// Maps to HTTP 503 Service Unavailable. Transport failures while
    /// polling map here.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use soundtrail::error::{Error, ErrorKind};
    /// let e = Error::unavailable("player endpoint unreachable");
    /// assert_eq!(e.kind, ErrorKind::Unavailable);
    /// ```
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unavailable,
            error: error.into(),
        }
    }

    /// The operation is not implemented.
    ///
    /// Maps to HTTP 501 Not Implemented.
    pub fn unimplemented<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unimplemented,
            error: error.into(),
        }
    }

    /// Nothing more specific fits.
    ///
    /// Maps to HTTP 500 Internal Server Error.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unknown,
            error: error.into(),
        }
    }
}

/// Exposes the underlying cause, so error chains can be walked to the
/// root.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Maps `std::io` errors onto the closest category.
///
/// The arms below are the complete mapping; anything unlisted is
/// `Unknown`.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Classifies `reqwest` failures by what the client reports about them.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() {
            return Self::unavailable(err);
        }

        if err.is_status() {
            return Self::failed_precondition(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// JSON errors reuse the `std::io` classification, which is how
/// `serde_json` reports its causes underneath.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// A header value built by this crate failed validation.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// A URL built by this crate failed to parse.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// A malformed secrets file is an input problem, not a crate bug.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
