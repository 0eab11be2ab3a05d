//! mail-auth-proxy: authentication-proxying core for a mail gateway
//!
//! Sits between an unauthenticated mail client (POP3, IMAP, or SMTP) and a
//! backend chosen by an external pre-auth layer. Once handed credentials and
//! a backend address, it replays the login handshake upstream and, on
//! success, relays bytes transparently between the two sockets.
//!
//! # Scope
//!
//! This crate covers only the authentication-proxying core:
//!
//! - the per-protocol login state machine (`pop3`, `imap`, `smtp`)
//! - the upstream reply parser (`classify`)
//! - the bidirectional relay pump (`relay`)
//! - optional opportunistic TLS on the upstream leg (`tls`)
//!
//! The listening socket, the pre-auth protocol parser, and the credential
//! resolution backend are external collaborators; see [`session::PreAuthSession`]
//! for the interface this crate expects from them.
//!
//! # Example
//!
//! ```no_run
//! use mail_auth_proxy::config::Config;
//! use mail_auth_proxy::session::{proxy_init, Credentials, PeerAddr, PreAuthSession};
//! use mail_auth_proxy::protocol::{AuthMethod, ImapState, Pop3State, Protocol, SmtpState};
//! use mail_auth_proxy::secret::SecretBytes;
//!
//! # async fn demo(client: tokio::net::TcpStream, peer_addr: std::net::SocketAddr) {
//! let config = Config::default();
//! let session = PreAuthSession {
//!     protocol: Protocol::Pop3,
//!     creds: Credentials {
//!         login: b"alice".to_vec(),
//!         passwd: SecretBytes::new(b"secret".to_vec()),
//!     },
//!     tag: Vec::new(),
//!     smtp_from: Vec::new(),
//!     smtp_to: Vec::new(),
//!     esmtp: false,
//!     auth_method: AuthMethod::None,
//!     server_name: "gw.example".to_string(),
//!     initial_pop3_state: Pop3State::Start,
//!     initial_imap_state: ImapState::Start,
//!     initial_smtp_state: SmtpState::Start,
//!     tls_enabled: false,
//!     client,
//! };
//! let peer = PeerAddr { addr: peer_addr, name: "backend".to_string() };
//! let _outcome = proxy_init(session, peer, &config).await;
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: per-virtual-server configuration
//! - [`error`]: the crate's error enum
//! - [`buffer`]: the fixed-capacity upstream reply buffer (LineReader)
//! - [`classify`]: the pure per-protocol reply classifier
//! - [`pop3`], [`imap`], [`smtp`]: the three auth state machines
//! - [`tls`]: opportunistic upstream TLS upgrade and verification policy
//! - [`relay`]: the bidirectional relay pump
//! - [`session`]: `ProxySession` / `proxy_init`, tying the above together
//! - [`secret`]: a redacted byte-string newtype for credentials

pub mod action;
pub mod buffer;
pub mod classify;
pub mod config;
pub mod error;
pub mod imap;
pub mod pop3;
pub mod protocol;
pub mod relay;
pub mod secret;
pub mod session;
pub mod smtp;
pub mod tls;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use session::{proxy_init, Credentials, PeerAddr, PreAuthSession, SessionOutcome};
