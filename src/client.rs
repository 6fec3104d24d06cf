//! Live IMAP mailbox adapter.
//!
//! [`ImapMailbox`] connects with the configured [`Security`](crate::Security) mode,
//! logs in and selects the configured mailbox, then serves the [`Mailbox`]
//! capabilities. Every server round trip runs under a
//! timeout from [`TimeoutConfig`].
//!
//! # Example
//!
//! ```no_run
//! use email_passcode::{ImapMailbox, Mailbox, RunConfig};
//!
//! # async fn example() -> email_passcode::Result<()> {
//! let config = RunConfig::builder()
//!     .host("imap.example.com")
//!     .username("user@example.com")
//!     .password("app-password")
//!     .search_subject("Your code:")
//!     .build()?;
//!
//! let mut mailbox = ImapMailbox::connect(&config).await?;
//! let ids = mailbox.search(&config.search).await?;
//! println!("{} matching messages", ids.len());
//! mailbox.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{RunConfig, SearchCriteria, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::mailbox::{DeleteDisposition, HeaderFields, Mailbox, MessageId};
use crate::parser;
use crate::session::{self, AuthConfig, ImapSession};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Mailbox adapter backed by a real IMAP server.
///
/// Create using [`ImapMailbox::connect`]; release with [`Mailbox::close`].
pub struct ImapMailbox {
    session: ImapSession,
    timeouts: TimeoutConfig,
    description: String,
}

impl ImapMailbox {
    /// Connects to the IMAP server, authenticates and selects the configured mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection cannot be established ([`Error::TcpConnect`], [`Error::TlsConnect`],
    ///   [`Error::StartTls`], [`Error::ImapGreeting`], [`Error::ConnectTimeout`])
    /// - Authentication fails ([`Error::ImapLogin`], [`Error::AuthTimeout`])
    /// - Mailbox selection fails
    #[instrument(
        name = "ImapMailbox::connect",
        skip_all,
        fields(
            username = %config.username,
            imap_host = %config.host,
            security = %config.security,
            mailbox = %config.mailbox
        )
    )]
    pub async fn connect(config: &RunConfig) -> Result<Self> {
        let session = Self::initialize_session(config).await?;

        debug!("Mailbox ready");

        Ok(Self {
            session,
            timeouts: config.timeouts.clone(),
            description: format!("{}/{}", config.server_address(), config.mailbox),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Connects, logs in and selects the mailbox.
    ///
    /// A session that fails to select is logged out before the error is returned.
    async fn initialize_session(config: &RunConfig) -> Result<ImapSession> {
        let target_addr = config.server_address();
        let timeouts = &config.timeouts;

        let client = tokio::time::timeout(
            timeouts.connect,
            connection::connect(&config.host, &target_addr, config.security),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!(security = %config.security, "Connection established");

        let auth_config = AuthConfig {
            username: &config.username,
            password: config.password(),
        };

        let mut session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(client, &auth_config),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            username: config.username.clone(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        let selected = with_timeout(
            "select",
            timeouts.command,
            session::select_mailbox(&mut session, &config.mailbox),
        )
        .await;

        match selected {
            Ok(()) => Ok(session),
            Err(err) => {
                release_after_failure(&mut session, timeouts.logout).await;
                Err(err)
            }
        }
    }
}

impl Mailbox for ImapMailbox {
    #[instrument(name = "ImapMailbox::search", skip_all, fields(subject = %criteria.subject))]
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>> {
        let query = session::build_search_query(&criteria.from, &criteria.subject)?;
        let uids = with_timeout(
            "search",
            self.timeouts.command,
            session::search_uids(&mut self.session, &query),
        )
        .await?;

        Ok(uids.into_iter().map(MessageId).collect())
    }

    async fn fetch_headers(&mut self, id: MessageId) -> Result<HeaderFields> {
        let raw = with_timeout(
            "fetch",
            self.timeouts.command,
            session::fetch_header(&mut self.session, id.0),
        )
        .await?;

        Ok(raw
            .map(|raw| parser::parse_header_block(id.0, &raw))
            .unwrap_or_default())
    }

    async fn delete(&mut self, id: MessageId) -> Result<DeleteDisposition> {
        with_timeout(
            "store",
            self.timeouts.command,
            session::flag_deleted(&mut self.session, id.0),
        )
        .await?;

        Ok(DeleteDisposition::Deleted)
    }

    #[instrument(name = "ImapMailbox::close", skip(self))]
    async fn close(&mut self) -> Result<()> {
        with_timeout(
            "logout",
            self.timeouts.logout,
            session::logout(&mut self.session),
        )
        .await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("description", &self.description)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Best-effort logout of a session that is being abandoned.
async fn release_after_failure(session: &mut ImapSession, timeout: Duration) {
    match with_timeout("logout", timeout, session::logout(session)).await {
        Ok(()) => debug!("Logged out after failed setup"),
        Err(err) => warn!(error = %err, "Logout after failed setup also failed"),
    }
}

/// Runs one mailbox command under `timeout`.
async fn with_timeout<T>(
    operation: &'static str,
    timeout: Duration,
    command: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, command)
        .await
        .map_err(|_| Error::OperationTimeout { operation, timeout })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Security;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Plain-text server that greets, then answers each tagged command with the
    /// next scripted reply and records the commands it saw.
    async fn scripted_server(
        replies: &'static [&'static str],
    ) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            socket.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();

            let mut commands = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if socket.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let tag = line.split_whitespace().next().unwrap_or("*").to_string();
                commands.push(line.trim_end().to_string());
                socket
                    .write_all(reply.replace("{tag}", &tag).as_bytes())
                    .await
                    .unwrap();
            }
            commands
        });

        (port, server)
    }

    fn plain_config(port: u16) -> RunConfig {
        RunConfig::builder()
            .host("localhost")
            .port(port)
            .security(Security::Plain)
            .username("user")
            .password("secret")
            .search_subject("CODE")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_select_logs_out() {
        let (port, server) = scripted_server(&[
            "{tag} OK LOGIN completed\r\n",
            "{tag} NO Mailbox does not exist\r\n",
            "* BYE logging out\r\n{tag} OK LOGOUT completed\r\n",
        ])
        .await;

        let err = ImapMailbox::connect(&plain_config(port)).await.unwrap_err();
        let commands = server.await.unwrap();

        assert!(matches!(err, Error::SelectMailbox { .. }));
        assert_eq!(commands.len(), 3, "got {commands:?}");
        assert!(commands[0].contains("LOGIN"));
        assert!(commands[1].contains("SELECT"));
        assert!(commands[2].ends_with("LOGOUT"));
    }

    #[tokio::test]
    async fn test_plain_session_connects_and_closes() {
        let (port, server) = scripted_server(&[
            "{tag} OK LOGIN completed\r\n",
            "* 0 EXISTS\r\n{tag} OK [READ-WRITE] SELECT completed\r\n",
            "* BYE logging out\r\n{tag} OK LOGOUT completed\r\n",
        ])
        .await;

        let mut mailbox = ImapMailbox::connect(&plain_config(port)).await.unwrap();
        assert!(mailbox.description().ends_with("/INBOX"));
        mailbox.close().await.unwrap();

        let commands = server.await.unwrap();
        assert!(commands[2].ends_with("LOGOUT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<()> = with_timeout("search", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::OperationTimeout {
                operation: "search",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("fetch", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = RunConfig::builder()
            .host("localhost")
            .port(port)
            .username("user")
            .password("secret")
            .search_subject("CODE")
            .build()
            .unwrap();

        let err = ImapMailbox::connect(&config).await.unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Connection);
    }
}
