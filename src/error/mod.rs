//! The unified error handling system for the channel.

use std::fmt::{self, Display};

// 1. Core Types
pub use types::ProxyError;

/// A unified `Result` type for the entire crate.
///
/// All functions that can fail should return this type.
pub type Result<T> = std::result::Result<T, ProxyError>;

// 2. Module declarations
pub mod macros;
pub mod types;

// 3. Context Trait for adding context to errors.
/// Attach a human readable context message to a failing `Result`.
pub trait Context<T, E> {
    /// Wrap the error with a static context message.
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    /// Wrap the error with a lazily built context message.
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<ProxyError>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display,
    {
        self.with_context(|| context)
    }

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let context_message = context().to_string();
                Err(ProxyError::Context {
                    context: context_message,
                    source: Box::new(error.into()),
                })
            }
        }
    }
}

// 4. Failure kinds, used as the `kind` field on every denial/degradation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A requested override violated an invariant; soft, the safe prior value stays.
    ConfigurationDenied,
    /// The upstream resource could not be fetched for this request.
    ResourceUnavailable,
    /// Normalization or downstream transformation failed.
    TransformFailure,
    /// An entry point addressed a session id that is not registered.
    MissingSession,
}

impl FailureKind {
    /// Stable log field value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationDenied => "configuration_denied",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::TransformFailure => "transform_failure",
            Self::MissingSession => "missing_session",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
