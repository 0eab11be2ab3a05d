//! Error types for the proxy core.
//!
//! One variant per error kind in the design's error-handling section; see
//! `SessionOutcome` in `session.rs` for how each variant maps onto the
//! client-visible behaviour (generic 5xx vs. forwarded upstream reply).

use thiserror::Error;

/// Which phase a timeout or transport failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Auth,
    Relay,
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect / allocate / TLS-start failure before the auth handshake began.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Upstream sent a reply the classifier rejected. `payload` carries the
    /// failing reply line (minus CRLF) when `pass_error_message` is on and
    /// a line was actually captured; it is `None` otherwise.
    #[error("upstream rejected the login handshake")]
    UpstreamProtocol { payload: Option<Vec<u8>> },

    /// `recv` returned 0 or an OS error while still in the auth phase.
    #[error("upstream connection failed during authentication")]
    UpstreamTransport,

    #[error("{phase:?} timed out")]
    Timeout { phase: Phase },

    /// Upstream reply line exceeded the configured buffer size without a
    /// terminating CRLF.
    #[error("upstream sent too long response line")]
    Overflow,

    /// `send` to upstream returned fewer bytes than requested during the
    /// auth phase. Treated as fatal per the design note: this must never
    /// happen with a correctly-behaving upstream and short writes here are
    /// not retried or resumed.
    #[error("short write to upstream")]
    ShortWrite,

    /// SASL mechanism this core refuses to speak (anything but NONE/PLAIN/LOGIN).
    #[error("unsupported auth mechanism")]
    UnsupportedMechanism,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
