//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::connection::{ImapClient, MailStream};
use crate::error::{Error, Result};
use async_imap::Session;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Authenticated IMAP session over whichever transport was negotiated.
pub(crate) type ImapSession = Session<MailStream>;

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Logs in on a greeted client and returns the session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(username = %config.username)
)]
pub(crate) async fn authenticate(
    client: ImapClient,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    debug!("Authenticating to IMAP server");

    client
        .login(config.username, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            username: config.username.to_string(),
            source: e.0,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Selecting mailbox");

    session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(())
}

/// Runs a UID SEARCH and returns the matching UIDs in descending order.
#[instrument(name = "session::search", skip(session))]
pub(crate) async fn search_uids(session: &mut ImapSession, query: &str) -> Result<Vec<u32>> {
    let uids = session
        .uid_search(query)
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));

    debug!(uid_count = uids.len(), "Search completed");

    Ok(uids)
}

/// Fetches the raw header block of one message without marking it seen.
///
/// Returns `None` when the server answers without a header section.
#[instrument(name = "session::fetch_header", skip(session))]
pub(crate) async fn fetch_header(session: &mut ImapSession, uid: u32) -> Result<Option<Vec<u8>>> {
    let stream = session
        .uid_fetch(uid.to_string(), "BODY.PEEK[HEADER]")
        .await
        .map_err(|source| Error::ImapFetch { uid, source })?;
    let mut stream = std::pin::pin!(stream);

    let mut header = None;
    while let Some(fetch) = stream.next().await {
        let fetch = fetch.map_err(|source| Error::ImapFetch { uid, source })?;
        if header.is_none() {
            header = fetch.header().map(<[u8]>::to_vec);
        }
    }

    Ok(header)
}

/// Flags one message as `\Deleted` without expunging it.
#[instrument(name = "session::flag_deleted", skip(session))]
pub(crate) async fn flag_deleted(session: &mut ImapSession, uid: u32) -> Result<()> {
    let stream = session
        .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
        .await
        .map_err(|source| Error::ImapStore { uid, source })?;
    let mut stream = std::pin::pin!(stream);

    while let Some(update) = stream.next().await {
        update.map_err(|source| Error::ImapStore { uid, source })?;
    }

    debug!("Message flagged as deleted");
    Ok(())
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}

/// Builds the search query for a sender and subject substring.
///
/// An empty sender matches any sender. Non-ASCII values make the query declare
/// `CHARSET UTF-8`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] when a value contains CR or LF, which would
/// end the command line early.
pub(crate) fn build_search_query(from: &str, subject: &str) -> Result<String> {
    let criteria = if from.is_empty() {
        format!("SUBJECT {}", quote(subject)?)
    } else {
        format!("FROM {} SUBJECT {}", quote(from)?, quote(subject)?)
    };

    if from.is_ascii() && subject.is_ascii() {
        Ok(criteria)
    } else {
        Ok(format!("CHARSET UTF-8 {criteria}"))
    }
}

/// Quotes an IMAP search string argument.
fn quote(value: &str) -> Result<String> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidConfig {
            message: format!("search value {value:?} contains a line break"),
        });
    }

    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("\"{escaped}\""))
}
