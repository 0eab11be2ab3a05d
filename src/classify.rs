//! `ResponseClassifier`: pure functions from (protocol, state, completed
//! reply bytes) to a verdict. Each function assumes its caller already
//! confirmed the slice is a complete, CRLF-terminated reply per
//! `buffer::Buffer::poll_complete` — these functions never look at
//! incompleteness caused by a missing CRLF, only at protocol-level
//! "need another segment" conditions (SMTP multiline continuation, IMAP's
//! untagged-line-before-tag case).

use crate::protocol::{ImapState, Pop3State, SmtpState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Again,
    /// `payload` is the failing reply with its trailing CRLF stripped,
    /// present only when `pass_error_message` is enabled and a reply was
    /// actually captured (design §4.1, §7.2).
    Error { payload: Option<Vec<u8>> },
}

fn reject(buf: &[u8], pass_error_message: bool) -> Classification {
    let payload = if pass_error_message {
        Some(strip_crlf(buf).to_vec())
    } else {
        None
    };
    Classification::Error { payload }
}

fn strip_crlf(buf: &[u8]) -> &[u8] {
    &buf[..buf.len().saturating_sub(2)]
}

pub fn classify_pop3(_state: Pop3State, buf: &[u8], pass_error_message: bool) -> Classification {
    if buf.starts_with(b"+OK") {
        Classification::Ok
    } else {
        reject(buf, pass_error_message)
    }
}

/// `tag` is the IMAP tag chosen for the proxy's own LOGIN command, verbatim
/// including its trailing space (design §6).
pub fn classify_imap(
    state: ImapState,
    buf: &[u8],
    tag: &[u8],
    pass_error_message: bool,
) -> Classification {
    match state {
        ImapState::Start => {
            if buf.starts_with(b"* OK") {
                Classification::Ok
            } else {
                reject(buf, pass_error_message)
            }
        }
        ImapState::Login | ImapState::User => {
            if buf.first() == Some(&b'+') {
                Classification::Ok
            } else {
                reject(buf, pass_error_message)
            }
        }
        ImapState::Passwd => classify_imap_passwd(buf, tag, pass_error_message),
    }
}

/// Scans line-by-line for the proxy's tag. RFC 3501 §6.2.3 permits an
/// optional untagged (e.g. CAPABILITY) response before the tagged LOGIN
/// result, and that untagged line may arrive in its own TCP segment ahead
/// of the tagged one — so a line that isn't the tagged result means "keep
/// waiting", not "reject". Once the tagged line is actually found, its
/// verdict (OK or not) is conclusive.
fn classify_imap_passwd(buf: &[u8], tag: &[u8], pass_error_message: bool) -> Classification {
    let mut rest = buf;
    loop {
        if rest.starts_with(tag) {
            let after_tag = &rest[tag.len()..];
            return if after_tag.starts_with(b"OK") {
                Classification::Ok
            } else {
                reject(buf, pass_error_message)
            };
        }
        match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => rest = &rest[nl + 1..],
            None => return Classification::Again,
        }
        if rest.is_empty() {
            return Classification::Again;
        }
    }
}

/// `true` once byte-for-byte the reply is the final line of a (possibly
/// multiline) SMTP response. A multiline reply has `-` as the 4th byte of
/// every line but the last, which has a space there instead.
fn is_final_smtp_line(buf: &[u8]) -> bool {
    if buf.len() < 4 || buf[3] != b'-' {
        return true;
    }
    // Walk backwards to the last line's start and inspect its 4th byte.
    let mut i = buf.len();
    loop {
        if i < 2 {
            return false;
        }
        if buf[i - 2] == b'\r' && buf[i - 1] == b'\n' && i < buf.len() {
            // i is right after some internal CRLF; the line beginning
            // there runs up to the final CRLF.
            let line = &buf[i..];
            if line.len() >= 4 {
                return line[3] != b'-';
            }
            return false;
        }
        i -= 1;
    }
}

pub fn classify_smtp(state: SmtpState, buf: &[u8], pass_error_message: bool) -> Classification {
    if !is_final_smtp_line(buf) {
        return Classification::Again;
    }

    if buf.len() < 3 {
        return reject(buf, pass_error_message);
    }
    let code = &buf[..3];

    let ok = match state {
        SmtpState::Start => code == b"220",
        SmtpState::Helo | SmtpState::HeloXclient | SmtpState::HeloFrom | SmtpState::From => {
            code == b"250"
        }
        SmtpState::Xclient | SmtpState::XclientFrom | SmtpState::XclientHelo => {
            code == b"220" || code == b"250"
        }
        // Open question in the design doc, preserved as-is: any reply at
        // all is accepted here so the client sees upstream's RCPT TO
        // verdict even when it's 4xx/5xx. Transport errors at this state
        // are only caught by the recv()-level error path, not here.
        SmtpState::To => true,
        SmtpState::AuthLogin | SmtpState::AuthUsername => code == b"334",
        SmtpState::AuthPlain | SmtpState::AuthPassword => code == b"235",
        SmtpState::Data => code == b"354",
        SmtpState::PreAuthPlain | SmtpState::PreAuthLogin => false,
    };

    if ok {
        Classification::Ok
    } else {
        reject(buf, pass_error_message)
    }
}
