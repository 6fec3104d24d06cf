//! Mailbox capability interface and session selection.
//!
//! The [`Mailbox`] trait covers the four capabilities a run needs: search,
//! header fetch, delete and release. Two adapters implement it:
//!
//! - [`ImapMailbox`](crate::ImapMailbox), talking to a real IMAP server
//! - [`SimulatedMailbox`](crate::SimulatedMailbox), returning synthetic messages
//!
//! [`MailboxSession::open`] picks the adapter once from the test-mode switches,
//! so nothing downstream ever looks at test-mode flags.

use crate::client::ImapMailbox;
use crate::config::{DeleteMode, RunConfig, SearchCriteria, SessionMode};
use crate::error::{Error, Result};
use crate::parser;
use crate::simulator::SimulatedMailbox;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

/// Opaque handle of a message inside the selected mailbox (its IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u32);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw header values of one message, before date normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    /// The `Date` header, if present.
    pub date: Option<String>,
    /// The decoded `Subject` header; empty if missing.
    pub subject: String,
}

/// A message that matched the search and has a valid date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Message handle, used for deletion.
    pub id: MessageId,
    /// Parsed `Date` header.
    pub received_at: DateTime<Utc>,
    /// Decoded subject line.
    pub subject: String,
}

/// What happened to a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// The message was flagged as deleted.
    Deleted,
    /// Test mode accepted the request without touching the mailbox.
    Suppressed,
}

/// Capabilities a passcode run needs from a mailbox.
#[allow(async_fn_in_trait)]
pub trait Mailbox {
    /// Returns identifiers of messages matching the criteria, newest first.
    ///
    /// `criteria.max_messages` is applied by the caller, not here.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>>;

    /// Fetches the `Date` and `Subject` headers of one message.
    async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields>;

    /// Flags one message as deleted. Nothing is expunged.
    async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition>;

    /// Releases the session.
    async fn close(&mut self) -> Result<()>;

    /// Human-readable description used in logs.
    fn description(&self) -> &str;
}

/// The mailbox adapter for one run, chosen from the test-mode switches.
#[derive(Debug)]
pub struct MailboxSession {
    backend: Backend,
    delete_mode: DeleteMode,
}

#[derive(Debug)]
enum Backend {
    Live(Box<ImapMailbox>),
    Simulated(SimulatedMailbox),
    Offline,
}

impl MailboxSession {
    /// Opens the session selected by `config.test_mode`.
    ///
    /// With test mode on and connection simulation off, no connection is made and an
    /// offline session is returned; its mailbox calls fail with [`Error::NoSession`].
    ///
    /// # Errors
    ///
    /// Returns connection or authentication errors from the live adapter.
    #[instrument(
        name = "MailboxSession::open",
        skip_all,
        fields(mode = ?config.test_mode.session_mode())
    )]
    pub async fn open(config: &RunConfig) -> Result<Self> {
        let backend = match config.test_mode.session_mode() {
            SessionMode::Live => Backend::Live(Box::new(ImapMailbox::connect(config).await?)),
            SessionMode::Simulated => {
                info!("Test mode: using simulated mailbox");
                Backend::Simulated(SimulatedMailbox::new(&config.search.subject))
            }
            SessionMode::Offline => {
                info!("Test mode: mailbox connection disabled");
                Backend::Offline
            }
        };

        Ok(Self::with_backend(backend, config.test_mode.delete_mode()))
    }

    /// Wraps an already-built simulator.
    #[must_use]
    pub fn simulated(simulator: SimulatedMailbox, delete_mode: DeleteMode) -> Self {
        Self::with_backend(Backend::Simulated(simulator), delete_mode)
    }

    /// A session without a connection.
    #[must_use]
    pub fn offline(delete_mode: DeleteMode) -> Self {
        Self::with_backend(Backend::Offline, delete_mode)
    }

    fn with_backend(backend: Backend, delete_mode: DeleteMode) -> Self {
        Self {
            backend,
            delete_mode,
        }
    }

    /// Which adapter is in use.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        match self.backend {
            Backend::Live(_) => SessionMode::Live,
            Backend::Simulated(_) => SessionMode::Simulated,
            Backend::Offline => SessionMode::Offline,
        }
    }

    /// Whether delete calls reach the adapter.
    #[must_use]
    pub fn delete_mode(&self) -> DeleteMode {
        self.delete_mode
    }

    /// The simulator, when the session is simulated.
    #[must_use]
    pub fn simulator(&self) -> Option<&SimulatedMailbox> {
        match &self.backend {
            Backend::Simulated(simulator) => Some(simulator),
            _ => None,
        }
    }
}

impl Mailbox for MailboxSession {
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
        match &mut self.backend {
            Backend::Live(client) => client.search(criteria).await,
            Backend::Simulated(simulator) => simulator.search(criteria).await,
            Backend::Offline => Err(Error::NoSession {
                operation: "search",
            }),
        }
    }

    async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields> {
        match &mut self.backend {
            Backend::Live(client) => client.fetch_headers(id).await,
            Backend::Simulated(simulator) => simulator.fetch_headers(id).await,
            Backend::Offline => Err(Error::NoSession {
                operation: "fetch headers",
            }),
        }
    }

    async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition> {
        if self.delete_mode == DeleteMode::Suppress {
            debug!(uid = id.0, "Test mode: delete suppressed");
            return Ok(DeleteDisposition::Suppressed);
        }

        match &mut self.backend {
            Backend::Live(client) => client.delete(id).await,
            Backend::Simulated(simulator) => simulator.delete(id).await,
            Backend::Offline => Err(Error::NoSession {
                operation: "delete",
            }),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Live(client) => client.close().await,
            Backend::Simulated(simulator) => simulator.close().await,
            Backend::Offline => Ok(()),
        }
    }

    fn description(&self) -> &str {
        match &self.backend {
            Backend::Live(client) => client.description(),
            Backend::Simulated(simulator) => simulator.description(),
            Backend::Offline => "offline (test mode)",
        }
    }
}

/// Searches the mailbox and fetches headers for the newest matches.
///
/// Identifiers are sorted descending and limited to `criteria.max_messages`.
/// Messages whose `Date` header is missing or unparseable are left out.
///
/// # Errors
///
/// Propagates search and fetch failures.
#[instrument(
    name = "mailbox::collect_candidates",
    skip_all,
    fields(mailbox = %mailbox.description(), max_messages = criteria.max_messages)
)]
pub async fn collect_candidates<M: Mailbox>(
    mailbox: &mut M,
    criteria: &SearchCriteria,
) -> Result<Vec<CandidateMessage>> {
    let mut ids = mailbox.search(criteria).await?;
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.truncate(criteria.max_messages);

    if ids.is_empty() {
        info!(subject = %criteria.subject, "No emails found");
        return Ok(Vec::new());
    }

    let mut candidates = Vec::with_capacity(ids.len());
    for id in ids {
        let headers = mailbox.fetch_headers(id).await?;

        let Some(received_at) = headers.date.as_deref().and_then(parser::parse_date) else {
            debug!(uid = id.0, date = ?headers.date, "Skipping message without a valid date");
            continue;
        };

        candidates.push(CandidateMessage {
            id,
            received_at,
            subject: headers.subject,
        });
    }

    debug!(candidate_count = candidates.len(), "Downloaded headers");

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory mailbox with arbitrary headers.
    #[derive(Default)]
    struct FakeMailbox {
        messages: BTreeMap<u32, HeaderFields>,
        fetched: Vec<u32>,
        deleted: Vec<u32>,
    }

    impl FakeMailbox {
        fn with(mut self, uid: u32, date: Option<&str>, subject: &str) -> Self {
            self.messages.insert(
                uid,
                HeaderFields {
                    date: date.map(str::to_string),
                    subject: subject.to_string(),
                },
            );
            self
        }
    }

    impl Mailbox for FakeMailbox {
        async fn search(&mut self, _criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
            // Deliberately ascending to prove the caller sorts
            Ok(self.messages.keys().copied().map(MessageId).collect())
        }

        async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields> {
            self.fetched.push(id.0);
            Ok(self.messages.get(&id.0).cloned().unwrap_or_default())
        }

        async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition> {
            self.deleted.push(id.0);
            Ok(DeleteDisposition::Deleted)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn description(&self) -> &str {
            "fake"
        }
    }

    fn criteria(max_messages: usize) -> SearchCriteria {
        SearchCriteria {
            from: String::new(),
            subject: "CODE".into(),
            max_messages,
        }
    }

    #[tokio::test]
    async fn test_collect_limits_to_newest_identifiers() {
        let mut mailbox = FakeMailbox::default()
            .with(1, Some("Tue, 1 Jul 2025 10:00:00 +0000"), "CODE 1")
            .with(2, Some("Tue, 1 Jul 2025 10:01:00 +0000"), "CODE 2")
            .with(3, Some("Tue, 1 Jul 2025 10:02:00 +0000"), "CODE 3");

        let candidates = collect_candidates(&mut mailbox, &criteria(2)).await.unwrap();

        assert_eq!(mailbox.fetched, vec![3, 2]);
        let ids: Vec<u32> = candidates.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_collect_skips_invalid_dates() {
        let mut mailbox = FakeMailbox::default()
            .with(1, Some("Tue, 1 Jul 2025 10:00:00 +0000"), "CODE good")
            .with(2, Some("yesterday-ish"), "CODE bad date")
            .with(3, None, "CODE no date");

        let candidates = collect_candidates(&mut mailbox, &criteria(10)).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].subject, "CODE good");
    }

    #[tokio::test]
    async fn test_collect_empty_search() {
        let mut mailbox = FakeMailbox::default();
        let candidates = collect_candidates(&mut mailbox, &criteria(10)).await.unwrap();
        assert!(candidates.is_empty());
        assert!(mailbox.fetched.is_empty());
    }

    #[tokio::test]
    async fn test_offline_session_fails_with_no_session() {
        let mut session = MailboxSession::offline(DeleteMode::Forward);
        assert_eq!(session.mode(), SessionMode::Offline);

        let err = collect_candidates(&mut session, &criteria(10)).await.unwrap_err();
        assert!(matches!(err, Error::NoSession { operation: "search" }));
        assert_eq!(err.category(), crate::ErrorCategory::Connection);

        // Releasing an offline session is a no-op
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_suppressed_deletes_never_reach_simulator() {
        let mut session =
            MailboxSession::simulated(SimulatedMailbox::new("CODE"), DeleteMode::Suppress);

        let disposition = session.delete(MessageId(3)).await.unwrap();

        assert_eq!(disposition, DeleteDisposition::Suppressed);
        assert!(session.simulator().unwrap().deleted().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_deletes_reach_simulator() {
        let mut session =
            MailboxSession::simulated(SimulatedMailbox::new("CODE"), DeleteMode::Forward);

        let disposition = session.delete(MessageId(3)).await.unwrap();

        assert_eq!(disposition, DeleteDisposition::Deleted);
        assert_eq!(session.simulator().unwrap().deleted(), &[MessageId(3)]);
    }
}
