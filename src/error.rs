//! Error types for the email-passcode crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped by the remediation they call for - see [`Error::category`].
//!
//! Window injection failures are deliberately *not* errors: they are reported as
//! [`AutomationWarning`](crate::automation::AutomationWarning) values inside the
//! delivery outcome and never abort a run.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a passcode retrieval run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// The settings file could not be read.
    #[error("failed to read settings file {path}")]
    SettingsIo {
        /// Path of the settings file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON or has the wrong shape.
    #[error("failed to parse settings file {path}")]
    SettingsParse {
        /// Path of the settings file.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Connection errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server's greeting was missing or not an `OK`.
    #[error("IMAP server at {target} refused the session: {reason}")]
    ImapGreeting {
        /// The target address.
        target: String,
        /// Status and text of the greeting, or why there was none.
        reason: String,
    },

    /// The server did not accept `STARTTLS`.
    #[error("STARTTLS upgrade failed at {target}")]
    StartTls {
        /// The target address.
        target: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// A mailbox call was made without a session.
    ///
    /// Produced when test mode is enabled but connection simulation is not:
    /// no connection is opened, so every mailbox operation fails here.
    #[error("no mailbox session: {operation} attempted while test mode has connections disabled")]
    NoSession {
        /// The mailbox operation that was attempted.
        operation: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {username}")]
    ImapLogin {
        /// The username used for login.
        username: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {username} after {timeout:?}")]
    AuthTimeout {
        /// The username used for authentication.
        username: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP store (flag update) failed.
    #[error("IMAP store failed for UID {uid}")]
    ImapStore {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// A mailbox command did not complete in time.
    #[error("{operation} timeout after {timeout:?}")]
    OperationTimeout {
        /// The IMAP operation that timed out.
        operation: &'static str,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Selection errors
    // ─────────────────────────────────────────────────────────────────────────
    /// No candidate message matched the search criteria.
    #[error("no matching email found")]
    NoMatch,

    /// The newest matching message left nothing once the subject token was removed.
    #[error("matching email from {received_at} has no passcode after removing '{token}' from its subject")]
    EmptySecret {
        /// The subject token that was removed.
        token: String,
        /// When the message was received.
        received_at: chrono::DateTime<chrono::Utc>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Writing the secret to the clipboard failed.
    #[error("failed to copy passcode to clipboard: {message}")]
    Clipboard {
        /// Description of the clipboard failure.
        message: String,
    },

    /// One or more messages could not be deleted.
    #[error("failed to delete {failed} of {attempted} messages")]
    Delete {
        /// Number of delete calls issued.
        attempted: usize,
        /// Number of delete calls that failed.
        failed: usize,
        /// The first failure encountered.
        #[source]
        source: Box<Error>,
    },

    /// The delivery pipeline was driven out of order.
    #[error("delivery step '{step}' is not allowed in state {state}")]
    InvalidState {
        /// The step that was requested.
        step: &'static str,
        /// The state the pipeline was in.
        state: String,
    },
}

impl Error {
    /// Returns the error category for logging and exit reporting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::SettingsIo { .. }
            | Error::SettingsParse { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ImapGreeting { .. }
            | Error::StartTls { .. }
            | Error::ConnectTimeout { .. }
            | Error::NoSession { .. } => ErrorCategory::Connection,

            Error::ImapLogin { .. } | Error::AuthTimeout { .. } => ErrorCategory::Authentication,

            Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapStore { .. }
            | Error::ImapLogout { .. }
            | Error::OperationTimeout { .. } => ErrorCategory::Protocol,

            Error::NoMatch => ErrorCategory::NotFound,
            Error::EmptySecret { .. } => ErrorCategory::EmptySecret,
            Error::Clipboard { .. } => ErrorCategory::Clipboard,
            Error::Delete { .. } => ErrorCategory::Delete,
            Error::InvalidState { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns `true` when the failure points at mailbox content or search criteria
    /// rather than a broken system, so it should be shown as a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NotFound | ErrorCategory::EmptySecret
        )
    }
}

/// Error categories for logging and user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors, including a missing session.
    Connection,
    /// Login rejected or timed out.
    Authentication,
    /// IMAP protocol errors.
    Protocol,
    /// No message matched the search.
    NotFound,
    /// A message matched but carried no passcode.
    EmptySecret,
    /// Clipboard write failed.
    Clipboard,
    /// Message deletion failed.
    Delete,
    /// Internal sequencing errors.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::EmptySecret => write!(f, "empty_secret"),
            ErrorCategory::Clipboard => write!(f, "clipboard"),
            ErrorCategory::Delete => write!(f, "delete"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
