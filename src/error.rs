//! # Error Handling
//!
//! Hierarchical error type for the flipbook orchestration layer. Every variant
//! carries an [`ErrorContext`] with a timestamp, the operation being performed,
//! free-text context, an optional recovery suggestion, a severity and arbitrary
//! key/value metadata.
//!
//! ## Taxonomy
//!
//! - `Config` / `Validation`: rejected settings, surfaced before anything runs
//! - `PipelineInit`: the generative pipeline could not load or bind its backend
//! - `Generation`: a single cycle's pipeline invocation failed
//! - `Allocation`: a page buffer or display object could not be created
//! - `State`: an operation was attempted in the wrong lifecycle state
//! - `Cancelled`: a collaborator honoured the cancellation signal. This is not a
//!   failure; the generation loop swallows it at its boundary.
//! - `Io` / `External`: wrapped lower-level errors
//!
//! ## Usage
//!
//! ```rust
//! use flipbook::error::{FlipbookError, HasRecoverySuggestion};
//!
//! let error = FlipbookError::generation("img2img", "server returned 500")
//!     .with_context("rendering page 3")
//!     .with_recovery_suggestion("Check the pipeline server logs");
//!
//! assert_eq!(error.category(), "generation");
//! assert!(!error.is_cancellation());
//! assert_eq!(error.recovery_suggestion(), Some("Check the pipeline server logs"));
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, nothing went wrong
    Info,
    /// Warnings that may indicate potential issues
    Warning,
    /// Errors that stop the current operation
    Error,
    /// Errors that end the generation loop
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Additional metadata as key-value pairs
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Base error type for the flipbook library
#[derive(Debug)]
pub enum FlipbookError {
    /// Configuration errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Validation errors on individual values
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    /// The generative pipeline failed to initialize
    PipelineInit {
        backend: String,
        reason: String,
        context: ErrorContext,
    },
    /// A generation cycle failed for a reason other than cancellation
    Generation {
        stage: String,
        reason: String,
        context: ErrorContext,
    },
    /// Page buffer or display object allocation failed
    Allocation {
        resource: String,
        reason: String,
        context: ErrorContext,
    },
    /// Invalid lifecycle transitions
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// A collaborator observed the cancellation signal and unwound
    Cancelled {
        operation: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl FlipbookError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a pipeline initialization error
    pub fn pipeline_init(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineInit {
            backend: backend.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a generation error
    pub fn generation(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Generation {
            stage: stage.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create an allocation error
    pub fn allocation(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a state error
    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a cancellation marker
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Info),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error tied to a filesystem path
    pub fn io_at(
        operation: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an external library error
    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// True when this value only reports that cancellation was honoured
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::PipelineInit { context, .. } => context,
            Self::Generation { context, .. } => context,
            Self::Allocation { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Cancelled { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::PipelineInit { context, .. } => context,
            Self::Generation { context, .. } => context,
            Self::Allocation { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Cancelled { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::PipelineInit { .. } => "pipeline_init",
            Self::Generation { .. } => "generation",
            Self::Allocation { .. } => "allocation",
            Self::State { .. } => "state",
            Self::Cancelled { .. } => "cancelled",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for FlipbookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlipbookError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            FlipbookError::Validation {
                field,
                constraint,
                value,
                ..
            } => {
                write!(
                    f,
                    "Validation failed for '{}': {} (value: {})",
                    field, constraint, value
                )
            }
            FlipbookError::PipelineInit {
                backend, reason, ..
            } => {
                write!(f, "Failed to initialize pipeline on {}: {}", backend, reason)
            }
            FlipbookError::Generation { stage, reason, .. } => {
                write!(f, "Generation failed during {}: {}", stage, reason)
            }
            FlipbookError::Allocation {
                resource, reason, ..
            } => {
                write!(f, "Allocation failed for {}: {}", resource, reason)
            }
            FlipbookError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Invalid state '{}' when attempting '{}': {}",
                    current_state, attempted_operation, reason
                )
            }
            FlipbookError::Cancelled { operation, .. } => {
                write!(f, "Cancelled during {}", operation)
            }
            FlipbookError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "I/O error during {} on '{}': {}",
                        operation, path, source
                    )
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            FlipbookError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for FlipbookError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using our custom error type
pub type FlipbookResult<T> = Result<T, FlipbookError>;

/// Trait for errors with severity levels
pub trait HasSeverity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for FlipbookError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    /// Get recovery suggestion for this error
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for FlipbookError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error ends the generation loop
    pub fn is_fatal(error: &FlipbookError) -> bool {
        matches!(
            error,
            FlipbookError::Config { .. }
                | FlipbookError::PipelineInit { .. }
                | FlipbookError::Generation { .. }
                | FlipbookError::Allocation { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }

    /// Get error priority (higher numbers = higher priority)
    pub fn priority(error: &FlipbookError) -> u8 {
        match error.severity() {
            ErrorSeverity::Info => 0,
            ErrorSeverity::Warning => 1,
            ErrorSeverity::Error => 2,
            ErrorSeverity::Fatal => 3,
        }
    }
}

impl From<std::io::Error> for FlipbookError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for FlipbookError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<image::ImageError> for FlipbookError {
    fn from(error: image::ImageError) -> Self {
        Self::external("image", error)
    }
}
