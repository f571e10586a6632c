//! Error types for Libby Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by where they arise (setup code, remote service, settings,
//! storage) so the host can decide how to present them.
//!
//! ## Categories
//!
//! ### Setup code exchange
//! - `InvalidFormat` - local check, no request has been sent
//! - `ExchangeRejected` - the identity service declined the code or session
//! - `NetworkFailure` - retries exhausted or a non-retryable transport error
//!
//! ### Settings
//! - `ValidationFailure` - a non-network field (e.g. custom column lookup name)
//! - `PreferenceStore` - the preference file could not be written
//!
//! ### Remote API
//! - `ApiRequestFailed`, `InvalidApiResponse`, `Timeout`

use thiserror::Error;

/// Result type alias using our LibbyError type
pub type Result<T> = std::result::Result<T, LibbyError>;

/// Main error type for Libby Core
///
/// Every fallible operation in the crate returns this enum. Each variant
/// carries enough context for a log line; `user_message()` turns it into
/// text suitable for the host's error dialog.
#[derive(Error, Debug)]
pub enum LibbyError {
    // ===== Setup Code Errors =====

    /// Setup code is not exactly eight ASCII digits
    #[error("Invalid setup code format: {code}")]
    InvalidFormat { code: String },

    /// The identity service refused the code, or the session stayed unauthenticated
    #[error("Setup code {code} was rejected: {reason}")]
    ExchangeRejected { code: String, reason: String },

    /// Transport failure after the retry budget was spent
    #[error("Network error after {attempts} attempt(s): {message}")]
    NetworkFailure {
        message: String,
        /// Total attempts made, including the first
        attempts: u32,
        /// Whether another try later might succeed
        is_transient: bool,
    },

    // ===== Settings Errors =====

    /// A settings field failed validation before anything was persisted
    #[error("Invalid value for {field}: {message}")]
    ValidationFailure { field: String, message: String },

    /// Preference file could not be read back or written
    #[error("Preference store error: {0}")]
    PreferenceStore(String),

    // ===== Remote API Errors =====

    /// Remote service answered with a non-success status
    #[error("API request failed: {message}")]
    ApiRequestFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
        /// API endpoint that failed
        endpoint: Option<String>,
    },

    /// Remote service answered with a body we could not understand
    #[error("Invalid API response: {message}")]
    InvalidApiResponse {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    /// Operation timed out
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // ===== General Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// Helper methods for creating common errors
impl LibbyError {
    /// Create an InvalidFormat error for a setup code
    pub fn invalid_format<S: Into<String>>(code: S) -> Self {
        LibbyError::InvalidFormat { code: code.into() }
    }

    /// Create an ExchangeRejected error
    pub fn rejected<S: Into<String>, R: Into<String>>(code: S, reason: R) -> Self {
        LibbyError::ExchangeRejected {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Create a NetworkFailure error
    pub fn network_error<S: Into<String>>(message: S, attempts: u32, is_transient: bool) -> Self {
        LibbyError::NetworkFailure {
            message: message.into(),
            attempts,
            is_transient,
        }
    }

    /// Create a ValidationFailure error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        LibbyError::ValidationFailure {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an ApiRequestFailed error
    pub fn api_failed<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        LibbyError::ApiRequestFailed {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        LibbyError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        LibbyError::InternalError(message.into())
    }

    /// Check if error is retryable (transient network errors, timeouts, 5xx)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LibbyError::NetworkFailure { is_transient: true, .. }
                | LibbyError::Timeout(_)
                | LibbyError::ApiRequestFailed { status_code: Some(500..=599), .. }
        )
    }

    /// Check if error means the stored credential cannot be used
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LibbyError::InvalidFormat { .. }
                | LibbyError::ExchangeRejected { .. }
                | LibbyError::ApiRequestFailed { status_code: Some(401 | 403), .. }
        )
    }

    /// Check if error came from the setup code exchange
    pub fn is_exchange_error(&self) -> bool {
        matches!(
            self,
            LibbyError::InvalidFormat { .. }
                | LibbyError::ExchangeRejected { .. }
                | LibbyError::NetworkFailure { .. }
        )
    }

    /// Title for the host's error dialog
    pub fn dialog_title(&self) -> &'static str {
        match self {
            LibbyError::InvalidFormat { .. }
            | LibbyError::ExchangeRejected { .. }
            | LibbyError::NetworkFailure { .. } => "Libby Setup Code",
            LibbyError::ValidationFailure { field, .. } if field.starts_with("custcol_") => {
                "Custom columns"
            }
            LibbyError::ValidationFailure { .. } => "Settings",
            _ => "Libby",
        }
    }

    /// Get user-friendly error message suitable for display
    ///
    /// A rejected code and a network failure read the same to the user; the
    /// distinction stays available on the variant itself.
    pub fn user_message(&self) -> String {
        match self {
            LibbyError::InvalidFormat { code } => {
                format!("Invalid setup code format: {}", code)
            }
            LibbyError::ExchangeRejected { code, .. } => Self::unusable_code_message(code),
            LibbyError::NetworkFailure { .. } => Self::unusable_code_message(""),
            LibbyError::ValidationFailure { message, .. } => message.clone(),
            LibbyError::PreferenceStore(message) => {
                format!("Your settings could not be saved: {}", message)
            }
            _ => self.to_string(),
        }
    }

    fn unusable_code_message(code: &str) -> String {
        if code.is_empty() {
            "Unable to verify the setup code with Libby. Please get a new code and try again."
                .to_string()
        } else {
            format!(
                "Unable to verify setup code {} with Libby. Please get a new code and try again.",
                code
            )
        }
    }

    /// Dialog text for a failed exchange of `code`
    ///
    /// Rejections and exhausted retries both name the code the user typed.
    pub fn exchange_message(&self, code: &str) -> String {
        match self {
            LibbyError::ExchangeRejected { .. } | LibbyError::NetworkFailure { .. } => {
                Self::unusable_code_message(code)
            }
            _ => self.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LibbyError::network_error("reset", 2, true).is_retryable());
        assert!(!LibbyError::network_error("tls", 1, false).is_retryable());
        assert!(LibbyError::api_failed("boom", Some(503), None).is_retryable());
        assert!(!LibbyError::api_failed("nope", Some(404), None).is_retryable());
        assert!(!LibbyError::invalid_format("123").is_retryable());
    }

    #[test]
    fn test_rejected_and_network_read_the_same() {
        let rejected = LibbyError::rejected("12345678", "expired");
        let network = LibbyError::network_error("timed out", 2, true);
        assert!(rejected.user_message().contains("Unable to verify setup code 12345678"));
        assert!(network.user_message().starts_with("Unable to verify the setup code"));
        assert_eq!(rejected.dialog_title(), network.dialog_title());
    }

    #[test]
    fn test_exchange_message_names_the_code() {
        let err = LibbyError::network_error("timed out", 2, true);
        assert!(err.exchange_message("87654321").contains("87654321"));
        assert!(matches!(err, LibbyError::NetworkFailure { attempts: 2, .. }));
    }

    #[test]
    fn test_custom_column_dialog_title() {
        let err = LibbyError::validation("custcol_due_dt", "The lookup name must begin with a '#'");
        assert_eq!(err.dialog_title(), "Custom columns");
        assert_eq!(err.user_message(), "The lookup name must begin with a '#'");
    }
}
