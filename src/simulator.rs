//! Test-mode mailbox that never touches the network.
//!
//! The simulator answers every search with the same three messages, received
//! 120, 320 and 720 seconds before the simulator was created, each with the
//! configured subject token followed by a fixed code:
//!
//! ```
//! use email_passcode::{Mailbox, SimulatedMailbox, SearchCriteria};
//!
//! # async fn example() -> email_passcode::Result<()> {
//! let mut mailbox = SimulatedMailbox::new("CODE");
//! let ids = mailbox.search(&SearchCriteria::default()).await?;
//! assert_eq!(ids.len(), 3);
//!
//! let headers = mailbox.fetch_headers(ids[0]).await?;
//! assert_eq!(headers.subject, "CODE ABC123");
//! # Ok(())
//! # }
//! ```

use crate::config::SearchCriteria;
use crate::error::Result;
use crate::mailbox::{DeleteDisposition, HeaderFields, Mailbox, MessageId};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Synthetic messages as (uid, seconds before "now", code), newest first.
const SYNTHETIC_MESSAGES: [(u32, i64, &str); 3] = [
    (3, 120, "ABC123"),
    (2, 320, "MMM456"),
    (1, 720, "ZZZ999"),
];

/// Mailbox adapter returning deterministic synthetic messages.
///
/// Deletes reaching the simulator are recorded, see [`SimulatedMailbox::deleted`].
#[derive(Debug, Clone)]
pub struct SimulatedMailbox {
    now: DateTime<Utc>,
    subject: String,
    deleted: Vec<MessageId>,
    closed: bool,
}

impl SimulatedMailbox {
    /// Creates a simulator anchored at the current time.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self::anchored_at(subject, Utc::now())
    }

    /// Creates a simulator whose messages are dated relative to `now`.
    #[must_use]
    pub fn anchored_at(subject: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            now,
            subject: subject.into(),
            deleted: Vec::new(),
            closed: false,
        }
    }

    /// Messages whose delete call reached the simulator, in call order.
    #[must_use]
    pub fn deleted(&self) -> &[MessageId] {
        &self.deleted
    }

    /// Whether [`Mailbox::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Mailbox for SimulatedMailbox {
    async fn search(&mut self, _criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
        debug!("Simulated search");
        Ok(SYNTHETIC_MESSAGES
            .iter()
            .map(|(uid, _, _)| MessageId(*uid))
            .collect())
    }

    async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields> {
        let headers = SYNTHETIC_MESSAGES
            .iter()
            .find(|(uid, _, _)| *uid == id.0)
            .map(|(_, age_secs, code)| HeaderFields {
                date: Some((self.now - Duration::seconds(*age_secs)).to_rfc2822()),
                subject: format!("{} {code}", self.subject),
            })
            .unwrap_or_default();

        Ok(headers)
    }

    async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition> {
        debug!(uid = id.0, "Simulated delete");
        self.deleted.push(id);
        Ok(DeleteDisposition::Deleted)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn description(&self) -> &str {
        "simulated"
    }
}
