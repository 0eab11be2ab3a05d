//! `ProxySession`: the owning entity for one client session (spec.md §3).
//!
//! Modeled as a single `tokio` task rather than a struct with swapped
//! handler function pointers (spec.md §9 "handler swapping" note): phases
//! are an explicit sequence of awaits in `run_session`, so there is no
//! re-entrancy hazard from an in-flight event racing a phase change, and
//! dropping the `ProxySession`'s connections/buffers at the end of this
//! function reclaims everything at once — the arena-allocator intent from
//! §5 falls out of ordinary Rust ownership.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use crate::buffer::{Buffer, LineStatus};
use crate::classify::{self, Classification};
use crate::config::Config;
use crate::error::{Phase, ProxyError, Result};
use crate::protocol::{AuthMethod, ImapState, Pop3State, Protocol, SmtpState};
use crate::relay::{self, RelayOutcome};
use crate::secret::SecretBytes;
use crate::{imap, pop3, smtp, tls};
use crate::action::Action;

pub struct Credentials {
    pub login: Vec<u8>,
    pub passwd: SecretBytes,
}

/// The backend address chosen by the pre-auth layer (spec.md §6).
pub struct PeerAddr {
    pub addr: SocketAddr,
    pub name: String,
}

/// Everything the pre-auth layer hands over at `proxy_init` time (spec.md
/// §6). Only the `initial_*_state` field matching `protocol` is consulted;
/// the others are ignored.
pub struct PreAuthSession<C> {
    pub protocol: Protocol,
    pub creds: Credentials,
    /// IMAP only: the tag the proxy's own LOGIN command will use, verbatim
    /// including its trailing space.
    pub tag: Vec<u8>,
    /// SMTP only: cached envelope lines, without their trailing CRLF.
    pub smtp_from: Vec<u8>,
    pub smtp_to: Vec<u8>,
    pub esmtp: bool,
    pub auth_method: AuthMethod,
    pub server_name: String,
    pub initial_pop3_state: Pop3State,
    pub initial_imap_state: ImapState,
    pub initial_smtp_state: SmtpState,
    pub tls_enabled: bool,
    pub client: C,
}

/// `C` is handed back in every variant but `Relayed`: the external session
/// layer that called `proxy_init` still owns the client socket at that
/// point (§6 — "delegates to session-layer `internal_server_error`" /
/// "requests the session layer to flush + close" both presuppose the
/// session layer still has a socket to act on). `Relayed` needs nothing
/// further done to the client; the relay pump already drove it to EOF.
#[derive(Debug)]
pub enum SessionOutcome<C> {
    /// Login succeeded; the relay ran until `RelayOutcome`.
    Relayed(RelayOutcome),
    /// SMTP only: control returns to the external pre-auth parser. `reply`
    /// must be flushed to the client first (spec.md §4.5).
    HandedOff { reply: Vec<u8>, client: C },
    /// No upstream reply worth forwarding; client sees a generic 5xx.
    InternalError { client: C },
    /// `pass_error_message=on` and a failing reply was captured; caller
    /// flushes `reply` verbatim to the client, then closes.
    UpstreamRejected { reply: Vec<u8>, client: C },
}

/// Upstream connection, plain or TLS-upgraded (spec.md §4.7). A tagged enum
/// rather than a trait object, the same dispatch style the rest of this
/// crate uses for its finite, known-up-front set of variants.
enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_flush(cx),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Non-blocking entry point the pre-auth layer calls once it has learned
/// credentials and a backend (spec.md §6). Never panics; every failure
/// mode is folded into `SessionOutcome`.
pub async fn proxy_init<C>(
    mut session: PreAuthSession<C>,
    peer: PeerAddr,
    config: &Config,
) -> SessionOutcome<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    match run_session(&mut session, peer, config).await {
        Ok(RunOutcome::Relayed(outcome)) => SessionOutcome::Relayed(outcome),
        Ok(RunOutcome::HandedOff(reply)) => SessionOutcome::HandedOff {
            reply,
            client: session.client,
        },
        Err(ProxyError::UpstreamProtocol {
            payload: Some(reply),
        }) => SessionOutcome::UpstreamRejected {
            reply,
            client: session.client,
        },
        Err(_) => SessionOutcome::InternalError {
            client: session.client,
        },
    }
}

enum RunOutcome {
    Relayed(RelayOutcome),
    HandedOff(Vec<u8>),
}

async fn run_session<C>(
    session: &mut PreAuthSession<C>,
    peer: PeerAddr,
    config: &Config,
) -> Result<RunOutcome>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    info!(target: "mail_proxy", peer = %peer.name, "connecting to upstream");
    let tcp = TcpStream::connect(peer.addr)
        .await
        .map_err(|e| ProxyError::Setup(format!("connect to {}: {e}", peer.name)))?;

    let mut upstream = if session.tls_enabled {
        let tls_stream = tls::connect_upstream_tls(tcp, &peer.name, config.tls.verify)
            .await
            .map_err(|e| ProxyError::Setup(format!("tls handshake with {}: {e}", peer.name)))?;
        UpstreamStream::Tls(Box::new(tls_stream))
    } else {
        UpstreamStream::Plain(tcp)
    };

    let mut upstream_buf = Buffer::with_capacity(config.buffer_size);
    let client_buf = Buffer::with_capacity(config.buffer_size);

    let auth = time::timeout(
        config.auth_timeout(),
        run_auth(session, &mut upstream, &mut upstream_buf, config),
    )
    .await
    .map_err(|_| {
        warn!(target: "mail_proxy", "upstream timed out");
        ProxyError::Timeout { phase: Phase::Auth }
    })??;

    match auth {
        AuthOutcome::HandOff(reply) => Ok(RunOutcome::HandedOff(reply)),
        AuthOutcome::Relay => {
            let relay_outcome = relay::run_relay(
                &mut session.client,
                &mut upstream,
                client_buf,
                upstream_buf,
                config.timeout(),
            )
            .await?;
            Ok(RunOutcome::Relayed(relay_outcome))
        }
    }
}

enum AuthOutcome {
    Relay,
    HandOff(Vec<u8>),
}

async fn run_auth<C>(
    session: &mut PreAuthSession<C>,
    upstream: &mut UpstreamStream,
    buf: &mut Buffer,
    config: &Config,
) -> Result<AuthOutcome>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    match session.protocol {
        Protocol::Pop3 => {
            run_pop3_auth(
                upstream,
                buf,
                session.initial_pop3_state,
                &session.creds,
                config.pass_error_message,
            )
            .await
        }
        Protocol::Imap => {
            run_imap_auth(
                upstream,
                buf,
                session.initial_imap_state,
                &session.tag,
                &session.creds,
                config.pass_error_message,
            )
            .await
        }
        Protocol::Smtp => {
            let ctx = smtp::SmtpContext {
                server_name: &session.server_name,
                esmtp: session.esmtp,
                xclient: config.xclient,
                auth_method: session.auth_method,
                login: &session.creds.login,
                passwd: &session.creds.passwd,
                smtp_from: &session.smtp_from,
                smtp_to: &session.smtp_to,
            };
            run_smtp_auth(
                upstream,
                buf,
                session.initial_smtp_state,
                &ctx,
                config.pass_error_message,
            )
            .await
        }
    }
}

/// One non-blocking step: read more upstream bytes, `poll_complete()`, and
/// return the completed reply once there is one — callers loop this until
/// they have a full reply to classify.
async fn read_one_reply<U: AsyncRead + Unpin>(upstream: &mut U, buf: &mut Buffer) -> Result<()> {
    loop {
        match buf.poll_complete() {
            LineStatus::Complete(_) => return Ok(()),
            LineStatus::Overflow => {
                warn!(target: "mail_proxy", "upstream sent too long response line");
                return Err(ProxyError::Overflow);
            }
            LineStatus::Again => {
                debug!(target: "mail_proxy", "reading response from upstream");
                let n = upstream.read(buf.spare_mut()).await?;
                if n == 0 {
                    return Err(ProxyError::UpstreamTransport);
                }
                buf.advance(n);
            }
        }
    }
}

async fn send_auth_command<U: AsyncWrite + Unpin>(
    upstream: &mut U,
    cmd: &[u8],
    what: &str,
) -> Result<()> {
    info!(target: "mail_proxy", what, "sending command to upstream");
    // Auth-phase short writes are fatal and never retried (spec.md §9); the
    // relay phase's backpressure handling in `relay.rs` is a deliberately
    // separate code path.
    let n = upstream.write(cmd).await?;
    if n != cmd.len() {
        return Err(ProxyError::ShortWrite);
    }
    Ok(())
}

/// Logs the upstream reply that failed classification (spec.md §6 "upstream
/// sent invalid response"). Safe to log verbatim: it is the upstream's own
/// reply text, never anything this proxy sent, so it never carries `passwd`
/// (design invariant 4).
fn log_invalid_response(reply: &[u8]) {
    warn!(
        target: "mail_proxy",
        reply = %String::from_utf8_lossy(reply).trim_end(),
        "upstream sent invalid response"
    );
}

fn pop3_send_label(state: Pop3State) -> &'static str {
    match state {
        Pop3State::Start => "user name",
        Pop3State::User => "password",
        Pop3State::Passwd => "",
    }
}

fn imap_send_label(state: ImapState) -> &'static str {
    match state {
        ImapState::Start => "LOGIN",
        ImapState::Login => "user name",
        ImapState::User => "password",
        ImapState::Passwd => "",
    }
}

fn smtp_send_label(state: SmtpState, ctx: &smtp::SmtpContext<'_>) -> &'static str {
    match state {
        SmtpState::Start => {
            if ctx.esmtp || ctx.xclient {
                "EHLO"
            } else {
                "HELO"
            }
        }
        SmtpState::Helo => match ctx.auth_method {
            AuthMethod::Login => "AUTH LOGIN",
            _ => "AUTH PLAIN",
        },
        SmtpState::HeloFrom => "MAIL FROM",
        SmtpState::From => "RCPT TO",
        SmtpState::AuthLogin => "user name",
        SmtpState::AuthUsername => "password",
        _ => "",
    }
}

async fn run_pop3_auth(
    upstream: &mut UpstreamStream,
    buf: &mut Buffer,
    mut state: Pop3State,
    creds: &Credentials,
    pass_error_message: bool,
) -> Result<AuthOutcome> {
    loop {
        read_one_reply(upstream, buf).await?;
        let reply = match buf.poll_complete() {
            LineStatus::Complete(r) => r,
            _ => unreachable!("read_one_reply only returns once complete"),
        };

        match classify::classify_pop3(state, reply, pass_error_message) {
            Classification::Again => continue,
            Classification::Error { payload } => {
                log_invalid_response(reply);
                return Err(ProxyError::UpstreamProtocol { payload });
            }
            Classification::Ok => {
                buf.reset();
                match pop3::step(state, &creds.login, &creds.passwd) {
                    (Action::Send(cmd), Some(next)) => {
                        send_auth_command(upstream, &cmd, pop3_send_label(state)).await?;
                        state = next;
                    }
                    (Action::EnterRelay, _) => return Ok(AuthOutcome::Relay),
                    (Action::Fail(e), _) => return Err(e),
                    (Action::HandOff(_), _) | (Action::Send(_), None) => {
                        unreachable!("pop3::step never hands off or sends without a next state")
                    }
                }
            }
        }
    }
}

async fn run_imap_auth(
    upstream: &mut UpstreamStream,
    buf: &mut Buffer,
    mut state: ImapState,
    tag: &[u8],
    creds: &Credentials,
    pass_error_message: bool,
) -> Result<AuthOutcome> {
    loop {
        read_one_reply(upstream, buf).await?;
        let reply = match buf.poll_complete() {
            LineStatus::Complete(r) => r,
            _ => unreachable!("read_one_reply only returns once complete"),
        };

        match classify::classify_imap(state, reply, tag, pass_error_message) {
            Classification::Again => continue,
            Classification::Error { payload } => {
                log_invalid_response(reply);
                return Err(ProxyError::UpstreamProtocol { payload });
            }
            Classification::Ok => {
                buf.reset();
                match imap::step(state, tag, &creds.login, &creds.passwd) {
                    (Action::Send(cmd), Some(next)) => {
                        send_auth_command(upstream, &cmd, imap_send_label(state)).await?;
                        state = next;
                    }
                    (Action::EnterRelay, _) => return Ok(AuthOutcome::Relay),
                    (Action::Fail(e), _) => return Err(e),
                    (Action::HandOff(_), _) | (Action::Send(_), None) => {
                        unreachable!("imap::step never hands off or sends without a next state")
                    }
                }
            }
        }
    }
}

async fn run_smtp_auth(
    upstream: &mut UpstreamStream,
    buf: &mut Buffer,
    mut state: SmtpState,
    ctx: &smtp::SmtpContext<'_>,
    pass_error_message: bool,
) -> Result<AuthOutcome> {
    loop {
        read_one_reply(upstream, buf).await?;
        let reply = match buf.poll_complete() {
            LineStatus::Complete(r) => r.to_vec(),
            _ => unreachable!("read_one_reply only returns once complete"),
        };

        match classify::classify_smtp(state, &reply, pass_error_message) {
            Classification::Again => continue,
            Classification::Error { payload } => {
                log_invalid_response(&reply);
                return Err(ProxyError::UpstreamProtocol { payload });
            }
            Classification::Ok => {
                buf.reset();
                match smtp::step(state, &reply, ctx) {
                    (Action::Send(cmd), Some(next)) => {
                        send_auth_command(upstream, &cmd, smtp_send_label(state, ctx)).await?;
                        state = next;
                    }
                    (Action::EnterRelay, _) => return Ok(AuthOutcome::Relay),
                    (Action::HandOff(reply), _) => return Ok(AuthOutcome::HandOff(reply)),
                    (Action::Fail(e), _) => return Err(e),
                    (Action::Send(_), None) => {
                        unreachable!("smtp::step never sends without a next state")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    async fn echo_upstream_pop3(mut sock: tokio::net::TcpStream) {
        use tokio::io::{AsyncBufReadExt, BufReader};
        sock.write_all(b"+OK ready\r\n").await.unwrap();
        let (r, mut w) = sock.into_split();
        let mut lines = BufReader::new(r).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with("USER") {
                w.write_all(b"+OK\r\n").await.unwrap();
            } else if line.starts_with("PASS") {
                w.write_all(b"+OK logged in\r\n").await.unwrap();
                break;
            }
        }
    }

    #[tokio::test]
    async fn pop3_happy_path_enters_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            echo_upstream_pop3(sock).await;
        });

        let (client_near, mut client_far) = duplex(256);

        let session = PreAuthSession {
            protocol: Protocol::Pop3,
            creds: Credentials {
                login: b"alice".to_vec(),
                passwd: SecretBytes::new(b"secret".to_vec()),
            },
            tag: Vec::new(),
            smtp_from: Vec::new(),
            smtp_to: Vec::new(),
            esmtp: false,
            auth_method: AuthMethod::None,
            server_name: "gw.example".to_string(),
            initial_pop3_state: Pop3State::Start,
            initial_imap_state: ImapState::Start,
            initial_smtp_state: SmtpState::Start,
            tls_enabled: false,
            client: client_near,
        };

        let peer = PeerAddr {
            addr,
            name: "backend".to_string(),
        };
        let config = Config::default();

        tokio::spawn(async move {
            let _ = client_far.shutdown().await;
        });

        let outcome = proxy_init(session, peer, &config).await;
        assert!(matches!(outcome, SessionOutcome::Relayed(_)));
    }
}
