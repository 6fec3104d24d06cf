//! One passcode retrieval run.
//!
//! The [`Coordinator`] sequences the run:
//!
//! 1. open the mailbox session (live, simulated or offline)
//! 2. search and collect candidates
//! 3. select the newest candidate and extract the passcode
//! 4. classify its freshness
//! 5. copy to the clipboard, paste into the target process, delete candidates
//! 6. keep the console open for `show_console`
//! 7. release the session
//!
//! Anything failing before the clipboard write aborts the run with nothing
//! delivered. The session is released on every path once it was opened.
//!
//! ```no_run
//! use email_passcode::{Coordinator, DesktopAutomation, RunConfig, SystemClipboard};
//!
//! # async fn example() -> email_passcode::Result<()> {
//! let config = RunConfig::builder()
//!     .host("imap.example.com")
//!     .username("user@example.com")
//!     .password("app-password")
//!     .search_subject("Your code:")
//!     .build()?;
//!
//! let report = Coordinator::new(config, SystemClipboard::new(), DesktopAutomation::new())
//!     .run()
//!     .await?;
//! println!("{} ({})", report.secret.text, report.freshness.display);
//! # Ok(())
//! # }
//! ```

use crate::automation::WindowAutomation;
use crate::clipboard::ClipboardSink;
use crate::config::RunConfig;
use crate::delivery::{DeliveryOutcome, DeliveryPipeline};
use crate::error::Result;
use crate::freshness::{self, Freshness, FreshnessTier};
use crate::mailbox::{collect_candidates, CandidateMessage, Mailbox, MailboxSession};
use crate::selector::{SecretExtractor, SelectedSecret};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

/// Result of a successful run.
#[derive(Debug)]
pub struct RunReport {
    /// The delivered passcode.
    pub secret: SelectedSecret,
    /// Age of the source message.
    pub freshness: Freshness,
    /// What delivery did.
    pub outcome: DeliveryOutcome,
    /// Every candidate considered, newest identifier first.
    pub candidates: Vec<CandidateMessage>,
}

/// Runs one retrieval with the given delivery backends.
pub struct Coordinator<C, A> {
    config: RunConfig,
    clipboard: C,
    automation: A,
}

impl<C: ClipboardSink, A: WindowAutomation> Coordinator<C, A> {
    /// Creates a coordinator for one run.
    pub fn new(config: RunConfig, clipboard: C, automation: A) -> Self {
        Self {
            config,
            clipboard,
            automation,
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Opens the session selected by the configuration and runs.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run, or [`Error::Delete`](crate::Error::Delete)
    /// when some deletes failed after the passcode was delivered.
    #[instrument(name = "Coordinator::run", skip_all, fields(subject = %self.config.search.subject))]
    pub async fn run(self) -> Result<RunReport> {
        let mut session = MailboxSession::open(&self.config).await?;
        self.run_with(&mut session).await
    }

    /// Runs against an already opened mailbox, releasing it afterwards.
    ///
    /// # Errors
    ///
    /// Same as [`Coordinator::run`].
    pub async fn run_with<M: Mailbox>(self, mailbox: &mut M) -> Result<RunReport> {
        let result = self.execute(mailbox).await;

        if let Err(err) = mailbox.close().await {
            warn!(error = %err, mailbox = %mailbox.description(), "Failed to release mailbox session");
        } else {
            debug!("Mailbox session released");
        }

        let mut report = result?;
        if let Some(err) = report.outcome.deletion.take_error() {
            return Err(err);
        }
        Ok(report)
    }

    async fn execute<M: Mailbox>(self, mailbox: &mut M) -> Result<RunReport> {
        let Self {
            config,
            clipboard,
            automation,
        } = self;

        let extractor = SecretExtractor::new(&config.search.subject)?;
        let candidates = collect_candidates(mailbox, &config.search).await?;
        let secret = extractor.select(&candidates)?;

        let freshness = freshness::classify(Utc::now(), secret.source_timestamp, &config.freshness);
        report_passcode(&secret, &freshness);

        let mut pipeline = DeliveryPipeline::new(clipboard, automation);
        pipeline.copy(&secret)?;

        if let Some(process) = &config.target_process {
            pipeline.inject(process)?;
        }

        if config.delete_messages {
            pipeline.delete_all(mailbox, &candidates).await?;
        }

        let outcome = pipeline.finish()?;

        if !config.show_console.is_zero() {
            debug!(delay = ?config.show_console, "Pacing before exit");
            tokio::time::sleep(config.show_console).await;
        }

        Ok(RunReport {
            secret,
            freshness,
            outcome,
            candidates,
        })
    }
}

impl<C, A> std::fmt::Debug for Coordinator<C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Prints the passcode line with the severity of its freshness tier.
fn report_passcode(secret: &SelectedSecret, freshness: &Freshness) {
    let ago = &freshness.display;
    let text = &secret.text;
    match freshness.tier {
        FreshnessTier::Fresh => info!(tier = %freshness.tier, "{ago} ago\t\t{text}"),
        FreshnessTier::Aging => warn!(tier = %freshness.tier, "{ago} ago\t\t{text}"),
        FreshnessTier::Stale => error!(tier = %freshness.tier, "{ago} ago\t\t{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{AutomationError, WindowHandle};
    use crate::config::{DeleteMode, SearchCriteria, TestMode};
    use crate::error::Error;
    use crate::mailbox::{DeleteDisposition, HeaderFields, MessageId};
    use crate::simulator::SimulatedMailbox;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryClipboard {
        text: Option<String>,
    }

    impl ClipboardSink for MemoryClipboard {
        fn set_text(&mut self, text: &str) -> Result<()> {
            self.text = Some(text.to_string());
            Ok(())
        }
    }

    struct NoWindows;

    impl WindowAutomation for NoWindows {
        fn find_processes(&mut self, _name: &str) -> Vec<u32> {
            Vec::new()
        }

        fn windows(&mut self, _pid: u32) -> std::result::Result<Vec<WindowHandle>, AutomationError> {
            Ok(Vec::new())
        }

        fn focus(&mut self, _window: WindowHandle) -> std::result::Result<(), AutomationError> {
            Ok(())
        }

        fn paste_and_confirm(&mut self) -> std::result::Result<(), AutomationError> {
            Ok(())
        }
    }

    /// Mailbox with one message whose subject is only the token; tracks release.
    #[derive(Default)]
    struct TokenOnlyMailbox {
        closed: bool,
    }

    impl Mailbox for TokenOnlyMailbox {
        async fn search(&mut self, _criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
            Ok(vec![MessageId(1)])
        }

        async fn fetch_headers(&mut self, _id: MessageId) -> Result<HeaderFields> {
            Ok(HeaderFields {
                date: Some(Utc::now().to_rfc2822()),
                subject: "CODE".into(),
            })
        }

        async fn delete(&mut self, _id: MessageId) -> Result<DeleteDisposition> {
            Ok(DeleteDisposition::Deleted)
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Err(Error::OperationTimeout {
                operation: "logout",
                timeout: Duration::from_secs(5),
            })
        }

        fn description(&self) -> &str {
            "token-only"
        }
    }

    struct LockedClipboard;

    impl ClipboardSink for LockedClipboard {
        fn set_text(&mut self, _text: &str) -> Result<()> {
            Err(Error::Clipboard {
                message: "locked".into(),
            })
        }
    }

    /// Three fresh messages; deleting `failing` returns a store error.
    struct PartialDeleteMailbox {
        failing: MessageId,
        deletes: Vec<MessageId>,
        closed: bool,
    }

    impl PartialDeleteMailbox {
        fn failing_on(id: u32) -> Self {
            Self {
                failing: MessageId(id),
                deletes: Vec::new(),
                closed: false,
            }
        }
    }

    impl Mailbox for PartialDeleteMailbox {
        async fn search(&mut self, _criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
            Ok(vec![MessageId(1), MessageId(2), MessageId(3)])
        }

        async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields> {
            let received = Utc::now() - chrono::Duration::seconds(60 * i64::from(4 - id.0));
            Ok(HeaderFields {
                date: Some(received.to_rfc2822()),
                subject: format!("CODE {}", id.0),
            })
        }

        async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition> {
            self.deletes.push(id);
            if id == self.failing {
                return Err(Error::OperationTimeout {
                    operation: "store",
                    timeout: Duration::from_secs(30),
                });
            }
            Ok(DeleteDisposition::Deleted)
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn description(&self) -> &str {
            "partial-delete"
        }
    }

    fn config(delete_messages: bool, test_mode: TestMode) -> RunConfig {
        RunConfig::builder()
            .search_subject("CODE")
            .delete_messages(delete_messages)
            .test_mode(test_mode)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_delivers_newest() {
        let mut clipboard = MemoryClipboard::default();
        let mut session =
            MailboxSession::simulated(SimulatedMailbox::new("CODE"), DeleteMode::Forward);

        let started = tokio::time::Instant::now();
        let report = Coordinator::new(
            config(false, TestMode::new(true, true, true)),
            &mut clipboard,
            NoWindows,
        )
        .run_with(&mut session)
        .await
        .unwrap();

        assert_eq!(report.secret.text, "ABC123");
        assert_eq!(report.secret.message_id, MessageId(3));
        assert_eq!(report.freshness.tier, FreshnessTier::Aging);
        assert_eq!(report.candidates.len(), 3);
        assert_eq!(clipboard.text.as_deref(), Some("ABC123"));

        // Paced for the default five seconds, then released
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(session.simulator().unwrap().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_every_candidate() {
        let mut session =
            MailboxSession::simulated(SimulatedMailbox::new("CODE"), DeleteMode::Forward);

        let report = Coordinator::new(
            config(true, TestMode::new(true, true, true)),
            MemoryClipboard::default(),
            NoWindows,
        )
        .run_with(&mut session)
        .await
        .unwrap();

        assert_eq!(report.outcome.deletion.forwarded, 3);
        assert_eq!(
            session.simulator().unwrap().deleted(),
            &[MessageId(3), MessageId(2), MessageId(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gated_deletes_are_not_forwarded() {
        let test_mode = TestMode::new(true, true, false);
        let mut session =
            MailboxSession::simulated(SimulatedMailbox::new("CODE"), test_mode.delete_mode());

        let report = Coordinator::new(config(true, test_mode), MemoryClipboard::default(), NoWindows)
            .run_with(&mut session)
            .await
            .unwrap();

        assert_eq!(report.outcome.deletion.requested, 3);
        assert_eq!(report.outcome.deletion.suppressed, 3);
        assert!(session.simulator().unwrap().deleted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_secret_aborts_before_delivery() {
        let mut clipboard = MemoryClipboard::default();
        let mut mailbox = TokenOnlyMailbox::default();

        let err = Coordinator::new(
            config(true, TestMode::new(true, true, true)),
            &mut clipboard,
            NoWindows,
        )
        .run_with(&mut mailbox)
        .await
        .unwrap_err();

        // The release failure is logged, the run's own error wins
        assert!(matches!(err, Error::EmptySecret { .. }));
        assert!(mailbox.closed);
        assert!(clipboard.text.is_none());
    }

    #[tokio::test]
    async fn test_offline_run_fails_with_no_session() {
        let err = Coordinator::new(
            config(true, TestMode::new(true, false, true)),
            MemoryClipboard::default(),
            NoWindows,
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NoSession { operation: "search" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_reported_after_pacing_and_release() {
        let mut clipboard = MemoryClipboard::default();
        let mut mailbox = PartialDeleteMailbox::failing_on(2);

        let started = tokio::time::Instant::now();
        let err = Coordinator::new(
            config(true, TestMode::new(true, true, true)),
            &mut clipboard,
            NoWindows,
        )
        .run_with(&mut mailbox)
        .await
        .unwrap_err();

        match err {
            Error::Delete {
                attempted,
                failed,
                source,
            } => {
                assert_eq!(attempted, 3);
                assert_eq!(failed, 1);
                assert!(matches!(*source, Error::OperationTimeout { operation: "store", .. }));
            }
            other => panic!("expected delete error, got {other:?}"),
        }

        // Every delete was tried, the passcode was delivered first
        assert_eq!(mailbox.deletes, vec![MessageId(3), MessageId(2), MessageId(1)]);
        assert_eq!(clipboard.text.as_deref(), Some("3"));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(mailbox.closed);
    }

    #[tokio::test]
    async fn test_clipboard_failure_skips_deletes_and_releases() {
        let mut mailbox = PartialDeleteMailbox::failing_on(0);

        let err = Coordinator::new(
            config(true, TestMode::new(true, true, true)),
            LockedClipboard,
            NoWindows,
        )
        .run_with(&mut mailbox)
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Clipboard { .. }));
        assert!(mailbox.deletes.is_empty());
        assert!(mailbox.closed);
    }
}
