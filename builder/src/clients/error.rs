use super::http_status_code::HttpStatusCode;
use http::StatusCode;
use snafu::Snafu;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// The result type returned by engine client implementations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The error type returned by engine client implementations.
#[derive(Debug)]
pub enum EngineError {
    /// The client could not be created.
    InitializationFailed(Option<Box<dyn std::error::Error + Send + Sync + 'static>>),

    /// The request never got a response, e.g. a connection failure or a timeout.
    RequestFailed(Option<Box<dyn std::error::Error + Send + Sync + 'static>>),

    /// The engine received the request and reported that it could not carry it out.
    Rejected(Option<ErrorMessage>),

    /// An error occurred serializing or deserializing.
    Serialization(Option<Box<dyn std::error::Error + Send + Sync + 'static>>),
}

impl EngineError {
    /// Convenience for building a `Rejected` error from a message.
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Rejected(Some(message.into()))
    }
}

impl ErrorEnum for EngineError {
    fn variant_name(&self) -> &'static str {
        match self {
            EngineError::InitializationFailed(_) => "Initialization failed",
            EngineError::RequestFailed(_) => "Request failed",
            EngineError::Rejected(_) => "Rejected by engine",
            EngineError::Serialization(_) => "Serialization error",
        }
    }

    fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            EngineError::InitializationFailed(e) => e.as_ref().map(|some| some.as_ref()),
            EngineError::RequestFailed(e) => e.as_ref().map(|some| some.as_ref()),
            EngineError::Rejected(s) => s
                .as_ref()
                .map(|some| some as &(dyn std::error::Error + Send + Sync + 'static)),
            EngineError::Serialization(e) => e.as_ref().map(|some| some.as_ref()),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner_as_source()
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.display(f)
    }
}

/// The result type returned by [`TaskStore`] implementations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The error type returned by [`TaskStore`] implementations. `ConflictingWrite` and `NotFound`
/// drive the commit policy of the dispatch loop and must be reported as such by implementations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Conflicting concurrent write to {}", what))]
    ConflictingWrite { what: String },

    #[snafu(display("{} no longer exists", what))]
    NotFound { what: String },

    #[snafu(display("Unable to {} {}: {}", method, what, source))]
    Request {
        method: String,
        what: String,
        source: reqwest::Error,
    },

    #[snafu(display("Unable to create the task store client: {}", source))]
    StoreInitialization { source: reqwest::Error },

    #[snafu(display("Invalid task store url '{}': {}", url, source))]
    StoreUrl {
        url: String,
        source: url::ParseError,
    },
}

impl HttpStatusCode for StoreError {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            StoreError::ConflictingWrite { .. } => Some(StatusCode::CONFLICT),
            StoreError::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            StoreError::Request { source, .. } => source.status_code(),
            StoreError::StoreInitialization { .. } | StoreError::StoreUrl { .. } => None,
        }
    }
}

/// This struct can serve as an `Error` type when you want to provide an error message, but have no
/// underlying error type. It allows a string to serve as an error, which is what engines send back
/// when they reject a request, and is handy for fake engine implementations.
///
/// # Example
///
/// ```
/// # use builder::clients::ErrorMessage;
/// let _error: ErrorMessage = "Something bad happened".into();
/// ```
///
#[derive(Debug)]
pub struct ErrorMessage {
    message: String,
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.message, f)
    }
}

impl<S: Into<String>> From<S> for ErrorMessage {
    fn from(s: S) -> Self {
        Self { message: s.into() }
    }
}

impl std::error::Error for ErrorMessage {}

/// Shared `Display` and `Error::source` plumbing for error enums that wrap boxed inner errors.
pub(crate) trait ErrorEnum {
    fn variant_name(&self) -> &'static str;
    fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)>;

    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.inner() {
            None => Display::fmt(self.variant_name(), f),
            Some(inner) => write!(f, "{}: {}", self.variant_name(), inner),
        }
    }

    fn inner_as_source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner().map(|some| some as &(dyn Error + 'static))
    }
}
