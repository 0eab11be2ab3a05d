//! mail-auth-proxy demo binary.
//!
//! Accepts client connections one at a time, reads a minimal line-based
//! pre-auth handshake standing in for the gateway's real pre-auth parser,
//! and drives [`mail_auth_proxy::proxy_init`] the way that parser would.
//! This handshake is not part of the tested contract (see SPEC_FULL.md §2);
//! it exists only so the crate is exercisable end to end with `cargo run`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use mail_auth_proxy::config::Config;
use mail_auth_proxy::protocol::{AuthMethod, ImapState, Pop3State, Protocol, SmtpState};
use mail_auth_proxy::secret::SecretBytes;
use mail_auth_proxy::session::{proxy_init, Credentials, PeerAddr, PreAuthSession, SessionOutcome};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mail-auth-proxy")]
#[command(about = "Authentication-proxying core for a mail gateway", long_about = None)]
struct Cli {
    /// TOML config file; falls back to built-in defaults if absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the demo pre-auth listener accepts client connections on.
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mail_auth_proxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::from_file(&path)?,
        None => {
            info!("no config file specified, using defaults");
            Config::default()
        }
    };

    info!(listen = %cli.listen, "starting mail-auth-proxy demo listener");
    let listener = TcpListener::bind(cli.listen).await?;

    loop {
        let (client, peer) = listener.accept().await?;
        info!(%peer, "accepted client connection");
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(client, &config).await {
                warn!(%peer, error = %e, "demo pre-auth handshake failed");
            }
        });
    }
}

/// Reads one CRLF- or LF-terminated line without consuming any bytes past
/// it, so the socket handed to `proxy_init` afterwards starts exactly where
/// the real protocol traffic begins.
async fn read_handshake_line(client: &mut TcpStream) -> anyhow::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = client.read(&mut byte).await?;
        if n == 0 {
            anyhow::bail!("client closed before sending the pre-auth handshake");
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8(line)?)
}

/// Demo pre-auth handshake grammar (space-separated fields):
///
/// ```text
/// POP3 <login> <passwd> <peer_addr>
/// IMAP <login> <passwd> <peer_addr> <tag> <literal: 0|1>
/// SMTP <login> <passwd> <peer_addr> <auth: none|plain|login> <esmtp: 0|1>
/// ```
async fn handle_client(mut client: TcpStream, config: &Config) -> anyhow::Result<()> {
    let line = read_handshake_line(&mut client).await?;
    let fields: Vec<&str> = line.split_whitespace().collect();

    let (protocol, login, passwd, peer_addr, extra) = match fields.as_slice() {
        [proto, login, passwd, peer, rest @ ..] => (*proto, *login, *passwd, *peer, rest),
        _ => anyhow::bail!("malformed pre-auth handshake line: {line:?}"),
    };

    let peer_addr: SocketAddr = peer_addr.parse()?;
    let creds = Credentials {
        login: login.as_bytes().to_vec(),
        passwd: SecretBytes::new(passwd.as_bytes().to_vec()),
    };

    let session = match protocol.to_ascii_uppercase().as_str() {
        "POP3" => PreAuthSession {
            protocol: Protocol::Pop3,
            creds,
            tag: Vec::new(),
            smtp_from: Vec::new(),
            smtp_to: Vec::new(),
            esmtp: false,
            auth_method: AuthMethod::None,
            server_name: config.server_name.clone(),
            initial_pop3_state: Pop3State::Start,
            initial_imap_state: ImapState::Start,
            initial_smtp_state: SmtpState::Start,
            tls_enabled: config.tls.enable,
            client,
        },
        "IMAP" => {
            let [tag, literal] = extra else {
                anyhow::bail!("IMAP handshake needs <tag> <literal: 0|1>");
            };
            let mut tag = tag.to_string();
            if !tag.ends_with(' ') {
                tag.push(' ');
            }
            let initial_imap_state = if *literal == "1" {
                ImapState::Login
            } else {
                ImapState::Start
            };
            PreAuthSession {
                protocol: Protocol::Imap,
                creds,
                tag: tag.into_bytes(),
                smtp_from: Vec::new(),
                smtp_to: Vec::new(),
                esmtp: false,
                auth_method: AuthMethod::None,
                server_name: config.server_name.clone(),
                initial_pop3_state: Pop3State::Start,
                initial_imap_state,
                initial_smtp_state: SmtpState::Start,
                tls_enabled: config.tls.enable,
                client,
            }
        }
        "SMTP" => {
            let [auth, esmtp] = extra else {
                anyhow::bail!("SMTP handshake needs <auth: none|plain|login> <esmtp: 0|1>");
            };
            let auth_method = match auth.to_ascii_lowercase().as_str() {
                "none" => AuthMethod::None,
                "plain" => AuthMethod::Plain,
                "login" => AuthMethod::Login,
                other => anyhow::bail!("unknown auth method in demo handshake: {other}"),
            };
            PreAuthSession {
                protocol: Protocol::Smtp,
                creds,
                tag: Vec::new(),
                smtp_from: Vec::new(),
                smtp_to: Vec::new(),
                esmtp: *esmtp == "1",
                auth_method,
                server_name: config.server_name.clone(),
                initial_pop3_state: Pop3State::Start,
                initial_imap_state: ImapState::Start,
                initial_smtp_state: SmtpState::Start,
                tls_enabled: config.tls.enable,
                client,
            }
        }
        other => anyhow::bail!("unknown protocol in demo handshake: {other}"),
    };

    let peer = PeerAddr {
        addr: peer_addr,
        name: peer_addr.to_string(),
    };

    match proxy_init(session, peer, config).await {
        SessionOutcome::Relayed(outcome) => {
            info!(?outcome, "session relayed to completion");
        }
        SessionOutcome::HandedOff { reply, mut client } => {
            info!("SMTP auth handed off to the external pre-auth parser");
            client.write_all(&reply).await?;
            client.shutdown().await?;
        }
        SessionOutcome::InternalError { mut client } => {
            warn!("session failed; sending a generic internal error to the client");
            client.write_all(b"internal server error\r\n").await?;
            client.shutdown().await?;
        }
        SessionOutcome::UpstreamRejected { reply, mut client } => {
            warn!("upstream rejected the login; forwarding its reply to the client");
            client.write_all(&reply).await?;
            client.write_all(b"\r\n").await?;
            client.shutdown().await?;
        }
    }

    Ok(())
}
