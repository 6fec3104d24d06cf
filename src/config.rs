//! Run configuration.
//!
//! A [`RunConfig`] is built once at startup (usually from the settings file, see
//! [`crate::settings`]) and handed by value to the [`Coordinator`](crate::Coordinator).
//! Nothing below the coordinator reads configuration from anywhere else.
//!
//! ```
//! use email_passcode::{RunConfig, Security};
//!
//! let config = RunConfig::builder()
//!     .host("imap.example.com")
//!     .username("user@example.com")
//!     .password("app-password")
//!     .search_subject("Your code:")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.port, 993);
//! assert_eq!(config.security, Security::Tls);
//! ```

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Elapsed time after which a passcode message is considered stale.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Configuration for one passcode retrieval run.
///
/// Create using [`RunConfig::builder()`].
///
/// The `password` field is stored as a [`SecretString`] to prevent accidental
/// logging of credentials.
#[derive(Clone)]
pub struct RunConfig {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (default: 993 for IMAPS).
    pub port: u16,
    /// Transport security (default: chosen from the port).
    pub security: Security,
    /// Login name.
    pub username: String,
    password: SecretString,
    /// Mailbox to search (default: `INBOX`).
    pub mailbox: String,
    /// Which messages to consider.
    pub search: SearchCriteria,
    /// Delete every candidate message once the passcode was delivered.
    pub delete_messages: bool,
    /// How long to keep the console open after delivery.
    pub show_console: Duration,
    /// Freshness thresholds for the selected message.
    pub freshness: FreshnessThresholds,
    /// Process whose windows receive the pasted passcode, if any.
    pub target_process: Option<String>,
    /// Simulation switches.
    pub test_mode: TestMode,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("mailbox", &self.mailbox)
            .field("search", &self.search)
            .field("delete_messages", &self.delete_messages)
            .field("show_console", &self.show_console)
            .field("freshness", &self.freshness)
            .field("target_process", &self.target_process)
            .field("test_mode", &self.test_mode)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl RunConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Returns the password as a string slice.
    ///
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport security for the IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (IMAPS).
    Tls,
    /// Plain connection upgraded with `STARTTLS` before login.
    StartTls,
    /// No transport security. Credentials travel in the clear.
    Plain,
}

impl Security {
    /// Picks the mode conventionally served on `port`: 143 is `STARTTLS`,
    /// everything else implicit TLS.
    #[must_use]
    pub fn for_port(port: u16) -> Self {
        match port {
            143 => Security::StartTls,
            _ => Security::Tls,
        }
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Security::Tls => write!(f, "tls"),
            Security::StartTls => write!(f, "starttls"),
            Security::Plain => write!(f, "plain"),
        }
    }
}

impl std::str::FromStr for Security {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "imaps" => Ok(Security::Tls),
            "starttls" => Ok(Security::StartTls),
            "plain" | "none" => Ok(Security::Plain),
            other => Err(Error::InvalidConfig {
                message: format!("unknown security mode '{other}'"),
            }),
        }
    }
}

/// Server-side search predicate plus the client-side limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Substring of the sender address. Empty means any sender.
    pub from: String,
    /// Substring of the subject; also the token stripped to obtain the passcode.
    pub subject: String,
    /// Maximum number of matches (newest first) whose headers are fetched.
    pub max_messages: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            from: String::new(),
            subject: String::new(),
            max_messages: 10,
        }
    }
}

/// Thresholds for [`FreshnessTier`](crate::freshness::FreshnessTier) classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessThresholds {
    /// Older than this is at least "aging".
    pub warn_after: Duration,
    /// Older than this is "stale".
    pub stale_after: Duration,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            warn_after: Duration::from_secs(30),
            stale_after: STALE_AFTER,
        }
    }
}

/// Test-mode switches.
///
/// The capability flags only take effect while the master switch is on; with
/// the master switch off the live client is used and deletes are forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestMode {
    enabled: bool,
    imap_connect: bool,
    delete_messages: bool,
}

impl TestMode {
    /// Creates test-mode switches from the master flag and the two capability flags.
    #[must_use]
    pub fn new(enabled: bool, imap_connect: bool, delete_messages: bool) -> Self {
        Self {
            enabled,
            imap_connect,
            delete_messages,
        }
    }

    /// Test mode fully off.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Master switch.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether connections are simulated. Always `false` with the master switch off.
    #[must_use]
    pub fn imap_connect(&self) -> bool {
        self.enabled && self.imap_connect
    }

    /// Whether deletes are forwarded in test mode. Always `false` with the master switch off.
    #[must_use]
    pub fn delete_messages(&self) -> bool {
        self.enabled && self.delete_messages
    }

    /// Which mailbox adapter a session should use.
    #[must_use]
    pub fn session_mode(&self) -> SessionMode {
        match (self.enabled, self.imap_connect) {
            (false, _) => SessionMode::Live,
            (true, true) => SessionMode::Simulated,
            (true, false) => SessionMode::Offline,
        }
    }

    /// Whether delete calls reach the mailbox adapter.
    #[must_use]
    pub fn delete_mode(&self) -> DeleteMode {
        if self.enabled && !self.delete_messages {
            DeleteMode::Suppress
        } else {
            DeleteMode::Forward
        }
    }
}

/// The mailbox adapter chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Real IMAP server.
    Live,
    /// Synthetic messages, no network.
    Simulated,
    /// No session at all; every mailbox call fails with [`Error::NoSession`].
    Offline,
}

/// What happens to delete calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Issue the delete against the mailbox adapter.
    Forward,
    /// Accept the delete without touching the mailbox.
    Suppress,
}

/// Timeout configuration for mailbox operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for each select, search, fetch and store command.
    pub command: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            command: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    security: Option<Security>,
    username: Option<String>,
    password: Option<String>,
    mailbox: Option<String>,
    search: SearchCriteria,
    delete_messages: bool,
    show_console: Option<Duration>,
    freshness: Option<FreshnessThresholds>,
    target_process: Option<String>,
    test_mode: TestMode,
    timeouts: Option<TimeoutConfig>,
}

impl RunConfigBuilder {
    /// Sets the IMAP server hostname (required unless test mode skips the connection).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    ///
    /// Default is 993 (IMAPS with TLS).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the transport security.
    ///
    /// Without this the mode follows the port, see [`Security::for_port`].
    #[must_use]
    pub fn security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    /// Sets the login name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the mailbox to search (default `INBOX`).
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the sender substring.
    #[must_use]
    pub fn search_from(mut self, from: impl Into<String>) -> Self {
        self.search.from = from.into();
        self
    }

    /// Sets the subject substring (required).
    #[must_use]
    pub fn search_subject(mut self, subject: impl Into<String>) -> Self {
        self.search.subject = subject.into();
        self
    }

    /// Sets how many of the newest matches are considered.
    #[must_use]
    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.search.max_messages = max_messages;
        self
    }

    /// Deletes all candidate messages after delivery.
    #[must_use]
    pub fn delete_messages(mut self, delete: bool) -> Self {
        self.delete_messages = delete;
        self
    }

    /// Sets how long the console stays open after delivery.
    #[must_use]
    pub fn show_console(mut self, duration: Duration) -> Self {
        self.show_console = Some(duration);
        self
    }

    /// Sets the age after which a passcode is flagged as aging.
    #[must_use]
    pub fn warn_after(mut self, warn_after: Duration) -> Self {
        self.freshness
            .get_or_insert_with(FreshnessThresholds::default)
            .warn_after = warn_after;
        self
    }

    /// Overrides the stale boundary (default [`STALE_AFTER`]).
    #[must_use]
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.freshness
            .get_or_insert_with(FreshnessThresholds::default)
            .stale_after = stale_after;
        self
    }

    /// Sets the process whose windows receive the pasted passcode.
    #[must_use]
    pub fn target_process(mut self, process_name: impl Into<String>) -> Self {
        self.target_process = Some(process_name.into());
        self
    }

    /// Sets the test-mode switches.
    #[must_use]
    pub fn test_mode(mut self, test_mode: TestMode) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the subject is empty, `max_messages` is zero,
    /// a timeout is zero, or a live run is missing host or credentials.
    pub fn build(self) -> Result<RunConfig> {
        if self.search.subject.trim().is_empty() {
            return Err(invalid("search subject is required"));
        }
        if self.search.max_messages == 0 {
            return Err(invalid("search must consider at least one message"));
        }

        let timeouts = self.timeouts.unwrap_or_default();
        for (name, timeout) in [
            ("connect", timeouts.connect),
            ("auth", timeouts.auth),
            ("command", timeouts.command),
            ("logout", timeouts.logout),
        ] {
            if timeout.is_zero() {
                return Err(Error::InvalidConfig {
                    message: format!("{name} timeout must be greater than zero"),
                });
            }
        }

        let live = self.test_mode.session_mode() == SessionMode::Live;
        let host = self.host.unwrap_or_default();
        let username = self.username.unwrap_or_default();
        let password = self.password.unwrap_or_default();

        if live {
            if host.trim().is_empty() {
                return Err(invalid("host is required"));
            }
            if username.is_empty() {
                return Err(invalid("username is required"));
            }
            if password.is_empty() {
                return Err(invalid("password is required"));
            }
        }

        let port = self.port.unwrap_or(993);
        Ok(RunConfig {
            host,
            port,
            security: self.security.unwrap_or_else(|| Security::for_port(port)),
            username,
            password: SecretString::from(password),
            mailbox: self.mailbox.unwrap_or_else(|| "INBOX".to_string()),
            search: self.search,
            delete_messages: self.delete_messages,
            show_console: self.show_console.unwrap_or(Duration::from_secs(5)),
            freshness: self.freshness.unwrap_or_default(),
            target_process: self.target_process.filter(|name| !name.trim().is_empty()),
            test_mode: self.test_mode,
            timeouts,
        })
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}
