//! Newest-message selection and passcode extraction.
//!
//! The passcode is the subject of the newest candidate with the search subject
//! token removed:
//!
//! ```
//! use email_passcode::selector::SecretExtractor;
//!
//! let extractor = SecretExtractor::new("OTP").unwrap();
//! assert_eq!(extractor.extract("OTP 123456  "), "123456");
//! assert_eq!(extractor.extract("Your otp: 42"), "Your : 42");
//! ```

use crate::error::{Error, Result};
use crate::mailbox::{CandidateMessage, MessageId};
use chrono::{DateTime, Utc};
use regex::{NoExpand, Regex, RegexBuilder};
use tracing::debug;

/// The passcode taken from the newest candidate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSecret {
    /// The passcode text, never empty.
    pub text: String,
    /// When the source message was received.
    pub source_timestamp: DateTime<Utc>,
    /// The source message.
    pub message_id: MessageId,
}

/// Picks the candidate with the latest `received_at`.
///
/// Equal timestamps are broken by the higher [`MessageId`], i.e. the message the
/// server stored last.
#[must_use]
pub fn select_newest(candidates: &[CandidateMessage]) -> Option<&CandidateMessage> {
    candidates.iter().max_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// Removes the subject token from subject lines.
#[derive(Debug, Clone)]
pub struct SecretExtractor {
    token: String,
    pattern: Option<Regex>,
}

impl SecretExtractor {
    /// Creates an extractor for a subject token, matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the token cannot be compiled into a matcher
    /// (only possible for pathologically long tokens).
    pub fn new(token: &str) -> Result<Self> {
        let pattern = if token.is_empty() {
            None
        } else {
            let regex = RegexBuilder::new(&regex::escape(token))
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::InvalidConfig {
                    message: format!("subject token cannot be matched: {e}"),
                })?;
            Some(regex)
        };

        Ok(Self {
            token: token.to_string(),
            pattern,
        })
    }

    /// The token being removed.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Removes the first occurrence of the token and trims surrounding whitespace.
    #[must_use]
    pub fn extract(&self, subject: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replacen(subject, 1, NoExpand(""))
                .trim()
                .to_string(),
            None => subject.trim().to_string(),
        }
    }

    /// Selects the newest candidate and extracts its passcode.
    ///
    /// # Errors
    ///
    /// - [`Error::NoMatch`] if there are no candidates
    /// - [`Error::EmptySecret`] if nothing is left after removing the token
    pub fn select(&self, candidates: &[CandidateMessage]) -> Result<SelectedSecret> {
        let newest = select_newest(candidates).ok_or(Error::NoMatch)?;

        debug!(
            uid = newest.id.0,
            received_at = %newest.received_at,
            candidate_count = candidates.len(),
            "Found newest email"
        );

        let text = self.extract(&newest.subject);
        if text.is_empty() {
            return Err(Error::EmptySecret {
                token: self.token.clone(),
                received_at: newest.received_at,
            });
        }

        Ok(SelectedSecret {
            text,
            source_timestamp: newest.received_at,
            message_id: newest.id,
        })
    }
}
