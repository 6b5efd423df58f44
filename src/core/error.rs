//! Error handling for the updater.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`UpdateError`]) for failures callers may want
//!    to match on, carried through `anyhow` like any other error.
//! 2. **User-friendly messages** ([`ErrorContext`]) with suggestions for the CLI.
//!
//! Verification problems are *not* errors: the verifier reports them as data
//! (`VerifyResult { valid: false, .. }`).
//!
//! # Examples
//!
//! ```rust,no_run
//! use gateway_update::core::{UpdateError, user_friendly_error};
//!
//! let err = anyhow::Error::from(UpdateError::NoSuitableAsset {
//!     os: "linux".to_string(),
//!     arch: "amd64".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Domain errors raised by the update engine.
#[derive(Error, Debug, Clone)]
pub enum UpdateError {
    /// The release feed or a download URL answered with a non-success status.
    #[error("HTTP request to {url} failed with status {status}")]
    Http {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// The release feed returned a body that is not a valid release description.
    #[error("Failed to parse release feed response: {reason}")]
    FeedParse {
        /// Parser message
        reason: String,
    },

    /// No release asset matches the running OS and architecture.
    #[error("No suitable binary for this platform ({os}/{arch})")]
    NoSuitableAsset {
        /// Operating system token
        os: String,
        /// Architecture token
        arch: String,
    },

    /// An archive entry would be written outside the extraction directory.
    #[error("Archive entry '{entry}' escapes the extraction directory")]
    UnsafeArchiveEntry {
        /// Raw entry name from the archive
        entry: String,
    },

    /// An archive entry type that is never extracted (links, devices).
    #[error("Archive entry '{entry}' has an unsupported type: {kind}")]
    UnsupportedArchiveEntry {
        /// Raw entry name from the archive
        entry: String,
        /// Entry type description
        kind: String,
    },

    /// The archive did not contain a recognizable executable.
    #[error("No executable found in archive {archive}")]
    ExecutableNotFound {
        /// Archive path
        archive: String,
    },

    /// The recovery backup expected next to the executable is missing.
    #[error("Backup file not found: {path}")]
    BackupMissing {
        /// Expected backup path
        path: String,
    },

    /// The state lock could not be acquired in time.
    #[error("Timed out acquiring update state lock at {path}")]
    StateLockTimeout {
        /// Lock file path
        path: String,
    },

    /// Replacing the executable failed.
    #[error("Installation failed: {reason}")]
    InstallFailed {
        /// What went wrong
        reason: String,
    },

    /// Restoring the backup failed.
    #[error("Rollback failed: {reason}")]
    RollbackFailed {
        /// What went wrong
        reason: String,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// Any other failure, rendered with its top-level message.
    #[error("{message}")]
    Other {
        /// Top-level error message
        message: String,
    },
}

/// An [`UpdateError`] together with optional details and a suggestion for the user.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpdateError,
    /// Actionable hint
    pub suggestion: Option<String>,
    /// Additional explanation
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new(error: UpdateError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] suitable for the CLI.
///
/// Typed [`UpdateError`]s anywhere in the chain get tailored suggestions; I/O
/// permission problems are recognized; everything else is wrapped with the
/// full `anyhow` chain as details.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    for cause in error.chain() {
        if let Some(update_error) = cause.downcast_ref::<UpdateError>() {
            return create_error_context(update_error.clone());
        }
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(UpdateError::InstallFailed {
            reason: io_error.to_string(),
        })
        .with_suggestion(
            "Check that the installation directory is writable, or re-run with elevated permissions",
        );
    }

    let details = format!("{error:#}");
    let message = error.to_string();
    let ctx = ErrorContext::new(UpdateError::Other { message: message.clone() });
    if details == message {
        ctx
    } else {
        ctx.with_details(details)
    }
}

fn create_error_context(error: UpdateError) -> ErrorContext {
    match &error {
        UpdateError::Http { status, .. } if *status == 403 => ErrorContext::new(error)
            .with_suggestion("The release feed rate limit may be exhausted; try again later"),
        UpdateError::Http { .. } => ErrorContext::new(error)
            .with_suggestion("Check your internet connection and try again"),
        UpdateError::NoSuitableAsset { .. } => ErrorContext::new(error)
            .with_details("The latest release does not publish a build for this platform")
            .with_suggestion("Download the gateway manually from the releases page"),
        UpdateError::UnsafeArchiveEntry { .. } | UpdateError::UnsupportedArchiveEntry { .. } => {
            ErrorContext::new(error)
                .with_details("The downloaded archive was rejected before anything was installed")
        }
        UpdateError::BackupMissing { .. } => ErrorContext::new(error)
            .with_details("No previous version is available to roll back to"),
        UpdateError::StateLockTimeout { .. } => ErrorContext::new(error)
            .with_suggestion("Another updater instance may be running; wait for it to finish"),
        UpdateError::RollbackFailed { .. } => ErrorContext::new(error).with_suggestion(
            "Reinstall the gateway manually; the backup file was left in place if it existed",
        ),
        _ => ErrorContext::new(error),
    }
}
