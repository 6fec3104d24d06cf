//! # email-passcode
//!
//! Fetches an emailed one-time passcode over IMAP and hands it to the operator.
//!
//! A run:
//! - searches the mailbox for messages matching a sender and subject token
//! - picks the newest one and strips the token from its subject to get the passcode
//! - classifies how old the message is (fresh, aging, stale)
//! - copies the passcode to the clipboard, optionally pastes it into the windows
//!   of a running process, and optionally deletes the matched messages
//!
//! ## Quick Start
//!
//! ```no_run
//! use email_passcode::{Coordinator, DesktopAutomation, RunConfig, SystemClipboard};
//!
//! # async fn example() -> email_passcode::Result<()> {
//! let config = RunConfig::builder()
//!     .host("imap.gmail.com")
//!     .username("user@gmail.com")
//!     .password("app-password")  // Use app-specific password for Gmail
//!     .search_from("no-reply@vpn.example.com")
//!     .search_subject("Your code:")
//!     .delete_messages(true)
//!     .build()?;
//!
//! let report = Coordinator::new(config, SystemClipboard::new(), DesktopAutomation::new())
//!     .run()
//!     .await?;
//!
//! println!("{} ago: {}", report.freshness.display, report.secret.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Test Mode
//!
//! [`TestMode`] swaps the IMAP server for a simulator returning three synthetic
//! messages, and can keep delete calls from reaching the mailbox:
//!
//! ```
//! use email_passcode::{DeleteMode, RunConfig, SessionMode, TestMode};
//!
//! let config = RunConfig::builder()
//!     .search_subject("CODE")
//!     .test_mode(TestMode::new(true, true, false))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.test_mode.session_mode(), SessionMode::Simulated);
//! assert_eq!(config.test_mode.delete_mode(), DeleteMode::Suppress);
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error`. [`Error::category`] groups them by the
//! remediation they need; "no match" and "empty passcode" are warnings, not faults:
//!
//! ```
//! use email_passcode::Error;
//!
//! fn describe(error: &Error) -> String {
//!     if error.is_warning() {
//!         format!("check the search criteria: {error}")
//!     } else {
//!         format!("{} error: {error}", error.category())
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation.
//!
//! ### Span Naming Convention
//!
//! - `Coordinator::run` - Whole run
//! - `MailboxSession::open` - Adapter selection
//! - `ImapMailbox::connect` - Live connection, login and mailbox selection
//! - `mailbox::collect_candidates` - Search and header download
//! - `DeliveryPipeline::inject` / `DeliveryPipeline::delete_all` - Delivery steps
//! - `session::*` - Individual IMAP commands
//! - `connection::connect` - TCP connection, TLS handshake or `STARTTLS` upgrade
//!
//! ### Standard Fields
//!
//! - `username` - Login name (the password is never recorded)
//! - `imap_host` - IMAP server hostname
//! - `mailbox` - Selected mailbox or adapter description
//! - `subject` - Subject token
//! - `uid` - Message UID

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod automation;
pub mod clipboard;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod freshness;
pub mod mailbox;
pub mod selector;
pub mod settings;

// Internal modules
mod client;
mod connection;
mod parser;
mod session;
mod simulator;

// Re-exports for ergonomic API
pub use automation::{AutomationWarning, DesktopAutomation, WindowAutomation};
pub use client::ImapMailbox;
pub use clipboard::{ClipboardSink, SystemClipboard};
pub use config::{
    DeleteMode, FreshnessThresholds, RunConfig, RunConfigBuilder, SearchCriteria, Security,
    SessionMode, TestMode, TimeoutConfig, STALE_AFTER,
};
pub use coordinator::{Coordinator, RunReport};
pub use delivery::{DeliveryOutcome, DeliveryPipeline, DeliveryState};
pub use error::{Error, ErrorCategory, Result};
pub use freshness::{Freshness, FreshnessTier};
pub use mailbox::{CandidateMessage, Mailbox, MailboxSession, MessageId};
pub use selector::{SecretExtractor, SelectedSecret};
pub use settings::Settings;
pub use simulator::SimulatedMailbox;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = RunConfig::builder();
        let _ = SecretExtractor::new("CODE").unwrap();
        let _ = Security::for_port(143);
        let _ = SimulatedMailbox::new("CODE");
        let _ = MailboxSession::offline(DeleteMode::Forward);
        let _ = Settings::default();
        let _ = freshness::format_elapsed(std::time::Duration::from_secs(45), FreshnessTier::Fresh);
    }
}
