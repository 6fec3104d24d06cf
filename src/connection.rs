//! Internal module for opening the transport to an IMAP server.
//!
//! Three modes, picked by [`Security`]:
//! - `Tls`: TLS handshake right after the TCP connect, then the server greeting
//! - `StartTls`: greeting and `STARTTLS` in the clear, then the TLS handshake
//! - `Plain`: no transport security
//!
//! Every mode hands back an unauthenticated [`ImapClient`] that has consumed the
//! greeting (there is none after a `STARTTLS` upgrade).

use crate::config::Security;
use crate::error::{Error, Result};
use async_imap::imap_proto::{Response, Status};
use async_imap::Client;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};

/// Byte stream under an IMAP client, encrypted or not.
#[derive(Debug)]
pub(crate) enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Unauthenticated client over either kind of stream.
pub(crate) type ImapClient = Client<MailStream>;

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connects to `target_addr` and brings the transport up to `security`.
///
/// `imap_host` is the name checked against the server certificate.
#[instrument(
    name = "connection::connect",
    skip_all,
    fields(imap_host = %imap_host, target_addr = %target_addr, security = %security)
)]
pub(crate) async fn connect(
    imap_host: &str,
    target_addr: &str,
    security: Security,
) -> Result<ImapClient> {
    let server_name = match security {
        Security::Plain => None,
        Security::Tls | Security::StartTls => Some(parse_server_name(imap_host)?),
    };
    let tcp = connect_tcp(target_addr).await?;

    match (security, server_name) {
        (Security::Tls, Some(server_name)) => {
            let tls = tls_handshake(server_name, tcp, target_addr).await?;
            read_greeting(MailStream::Tls(Box::new(tls)), target_addr).await
        }
        (Security::StartTls, Some(server_name)) => {
            let client = read_greeting(tcp, target_addr).await?;
            let tcp = request_starttls(client, target_addr).await?;
            let tls = tls_handshake(server_name, tcp, target_addr).await?;
            Ok(Client::new(MailStream::Tls(Box::new(tls))))
        }
        _ => {
            warn!("Connecting without transport security, credentials are sent in the clear");
            read_greeting(MailStream::Plain(tcp), target_addr).await
        }
    }
}

#[instrument(name = "connection::tcp_connect", skip_all, fields(target_addr = %target_addr))]
async fn connect_tcp(target_addr: &str) -> Result<TcpStream> {
    debug!("Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Wraps a stream in a client and checks the server's untagged `OK` greeting.
async fn read_greeting<T>(stream: T, target_addr: &str) -> Result<Client<T>>
where
    T: AsyncRead + AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    let mut client = Client::new(stream);

    let reason = match client.read_response().await {
        Some(Ok(response)) => match response.parsed() {
            Response::Data {
                status: Status::Ok,
                ..
            } => {
                debug!("Server greeting received");
                return Ok(client);
            }
            Response::Data {
                status,
                information,
                ..
            } => format!(
                "{status:?} {}",
                information.as_deref().unwrap_or_default()
            ),
            other => format!("unexpected response {other:?}"),
        },
        Some(Err(source)) => {
            return Err(Error::TcpConnect {
                target: target_addr.to_string(),
                source,
            })
        }
        None => "connection closed before the greeting".to_string(),
    };

    Err(Error::ImapGreeting {
        target: target_addr.to_string(),
        reason,
    })
}

/// Sends `STARTTLS` and takes the raw socket back for the handshake.
#[instrument(name = "connection::starttls", skip_all)]
async fn request_starttls(mut client: Client<TcpStream>, target_addr: &str) -> Result<TcpStream> {
    debug!("Requesting STARTTLS");

    client
        .run_command_and_check_ok("STARTTLS", None)
        .await
        .map_err(|source| Error::StartTls {
            target: target_addr.to_string(),
            source,
        })?;

    Ok(client.into_inner())
}

#[instrument(name = "connection::tls_handshake", skip_all)]
async fn tls_handshake(
    server_name: ServerName,
    tcp: TcpStream,
    target_addr: &str,
) -> Result<TlsStream<TcpStream>> {
    debug!("Performing TLS handshake");

    TlsConnector::from(tls_config())
        .connect(server_name, tcp)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Client configuration trusting the Mozilla root set from `webpki-roots`.
fn tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Server name for SNI and certificate verification.
fn parse_server_name(host: &str) -> Result<ServerName> {
    ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}
