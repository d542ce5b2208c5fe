/*!
 * Error types for the subloom pipeline.
 *
 * This module contains custom error types for the different layers of the
 * pipeline, using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

/// How a provider failure should be treated by the retry layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit / overload class, retried with exponential backoff
    Transient,
    /// Client-side error (bad request, auth), surfaced immediately
    Permanent,
    /// Network, parse or unknown failures, retried with the same budget
    Conservative,
}

/// Errors that can occur when talking to a model, transcription or media provider
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The provider reported it is temporarily overloaded
    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Classify this error for the retry layer.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimitExceeded(_) | Self::Overloaded(_) => ErrorClass::Transient,
            Self::ApiError { status_code, .. } => match status_code {
                429 | 503 => ErrorClass::Transient,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Conservative,
            },
            Self::AuthenticationError(_) => ErrorClass::Permanent,
            Self::RequestFailed(_)
            | Self::ParseError(_)
            | Self::ConnectionError(_)
            | Self::Timeout(_) => ErrorClass::Conservative,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Permanent
    }
}

/// Errors raised by the generation, batch-edit and quality-control pipelines
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A chunk failed in a non-recoverable stage; the whole job is aborted
    #[error("Chunk {index} failed during {stage}: {message}")]
    ChunkFailed {
        /// Zero-based chunk index
        index: usize,
        /// Stage that failed
        stage: String,
        /// Underlying failure
        message: String,
    },

    /// A provider call failed after retries
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Caller asked the job to stop
    #[error("Operation cancelled")]
    Cancelled,

    /// The request could not be executed as given
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A quality-control stage raised an error
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed {
        /// Stage name
        stage: String,
        /// Underlying failure
        message: String,
    },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from a pipeline run
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
