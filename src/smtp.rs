//! SMTP auth state machine — the most elaborate of the three (spec.md §4.4).
//!
//! Only `AuthMethod::None` (cached-envelope replay path — `smtp_helo_from`
//! unconditionally, regardless of `xclient`; see `ngx_mail_proxy_module.c`'s
//! `NGX_MAIL_AUTH_NONE` arm), `Plain`, and `Login` are ever driven by this
//! module; anything else is refused before a single byte reaches upstream
//! (spec.md §7 point 7).
//!
//! `Xclient`, `XclientHelo`, `XclientFrom`, and `Data` are reachable only
//! through hand-off: once control returns to the external SMTP pre-auth
//! parser (`Action::HandOff`), that parser drives the remaining commands
//! itself but may still call back into `classify`/`step` for each reply —
//! `step` defines an arm for `Data` (entering relay on `354`, spec.md §4.5)
//! for that reason, while `Xclient`/`XclientHelo`/`XclientFrom` are never
//! meaningfully stepped since nothing sent from inside this module ever
//! waits in them (see DESIGN.md for why XCLIENT itself is treated as an
//! external-driver concern: the client's own address, needed for the
//! XCLIENT line, isn't part of this crate's data model).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::action::Action;
use crate::error::ProxyError;
use crate::protocol::{AuthMethod, SmtpState};
use crate::secret::SecretBytes;

pub struct SmtpContext<'a> {
    pub server_name: &'a str,
    pub esmtp: bool,
    pub xclient: bool,
    pub auth_method: AuthMethod,
    pub login: &'a [u8],
    pub passwd: &'a SecretBytes,
    pub smtp_from: &'a [u8],
    pub smtp_to: &'a [u8],
}

fn helo_line(use_ehlo: bool, server_name: &str) -> Vec<u8> {
    let verb: &[u8] = if use_ehlo { b"EHLO " } else { b"HELO " };
    let mut cmd = Vec::with_capacity(verb.len() + server_name.len() + 2);
    cmd.extend_from_slice(verb);
    cmd.extend_from_slice(server_name.as_bytes());
    cmd.extend_from_slice(b"\r\n");
    cmd
}

fn auth_plain_line(login: &[u8], passwd: &SecretBytes) -> Vec<u8> {
    let mut blob = Vec::with_capacity(login.len() * 2 + passwd.len() + 2);
    blob.extend_from_slice(login);
    blob.push(0);
    blob.extend_from_slice(login);
    blob.push(0);
    blob.extend_from_slice(passwd.as_bytes());
    let encoded = BASE64.encode(&blob);

    let mut cmd = Vec::with_capacity(11 + encoded.len() + 2);
    cmd.extend_from_slice(b"AUTH PLAIN ");
    cmd.extend_from_slice(encoded.as_bytes());
    cmd.extend_from_slice(b"\r\n");
    cmd
}

/// Exactly `len("AUTH LOGIN") + 2` bytes, fully initialized — the original
/// over-allocates by two uninitialized bytes here (spec.md §9 open
/// question); not reproducible, and not reproduced, in safe Rust.
fn auth_login_line() -> Vec<u8> {
    b"AUTH LOGIN\r\n".to_vec()
}

fn base64_line(bytes: &[u8]) -> Vec<u8> {
    let encoded = BASE64.encode(bytes);
    let mut cmd = Vec::with_capacity(encoded.len() + 2);
    cmd.extend_from_slice(encoded.as_bytes());
    cmd.extend_from_slice(b"\r\n");
    cmd
}

fn external_state(state: SmtpState) -> (Action, Option<SmtpState>) {
    (
        Action::Fail(ProxyError::Setup(format!(
            "{state:?} is only ever reached via hand-off; the internal state machine never steps it"
        ))),
        None,
    )
}

/// `reply` is the completed, classified-OK upstream reply (CRLF included) —
/// needed verbatim for the `Action::HandOff` cases, which must forward it
/// to the client before releasing control (spec.md §4.5 step 1).
pub fn step(
    state: SmtpState,
    reply: &[u8],
    ctx: &SmtpContext<'_>,
) -> (Action, Option<SmtpState>) {
    match state {
        SmtpState::Start => {
            if !ctx.auth_method.is_supported() {
                return (Action::Fail(ProxyError::UnsupportedMechanism), None);
            }
            let use_ehlo = ctx.esmtp || ctx.xclient;
            let cmd = helo_line(use_ehlo, ctx.server_name);
            let next = match ctx.auth_method {
                AuthMethod::Plain | AuthMethod::Login => SmtpState::Helo,
                // NGX_MAIL_AUTH_NONE always lands in smtp_helo_from regardless
                // of xclient; smtp_helo_xclient is never assigned as a
                // mail_state in the original, only matched by its classifier.
                AuthMethod::None => SmtpState::HeloFrom,
                _ => unreachable!("gated by is_supported() above"),
            };
            (Action::Send(cmd), Some(next))
        }

        SmtpState::Helo => match ctx.auth_method {
            AuthMethod::Plain => (
                Action::Send(auth_plain_line(ctx.login, ctx.passwd)),
                Some(SmtpState::AuthPlain),
            ),
            AuthMethod::Login => (
                Action::Send(auth_login_line()),
                Some(SmtpState::AuthLogin),
            ),
            _ => (Action::Fail(ProxyError::UnsupportedMechanism), None),
        },

        // XCLIENT needs the client's own address, which this crate's data
        // model doesn't carry (see module doc); treated as a hand-off point
        // rather than inventing a command we can't build correctly.
        SmtpState::HeloXclient => (Action::HandOff(reply.to_vec()), None),

        SmtpState::HeloFrom => {
            if ctx.smtp_from.is_empty() {
                return (Action::HandOff(reply.to_vec()), None);
            }
            let mut cmd = Vec::with_capacity(ctx.smtp_from.len() + 2);
            cmd.extend_from_slice(ctx.smtp_from);
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(SmtpState::From))
        }

        SmtpState::From => {
            if ctx.smtp_to.is_empty() {
                return (Action::HandOff(reply.to_vec()), None);
            }
            let mut cmd = Vec::with_capacity(ctx.smtp_to.len() + 2);
            cmd.extend_from_slice(ctx.smtp_to);
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(SmtpState::To))
        }

        SmtpState::To => (Action::HandOff(reply.to_vec()), None),

        SmtpState::AuthLogin => (
            Action::Send(base64_line(ctx.login)),
            Some(SmtpState::AuthUsername),
        ),
        SmtpState::AuthUsername => (
            Action::Send(base64_line(ctx.passwd.as_bytes())),
            Some(SmtpState::AuthPassword),
        ),
        SmtpState::AuthPlain | SmtpState::AuthPassword => {
            (Action::HandOff(reply.to_vec()), None)
        }

        SmtpState::Data => (Action::EnterRelay, None),

        SmtpState::PreAuthPlain
        | SmtpState::PreAuthLogin
        | SmtpState::Xclient
        | SmtpState::XclientHelo
        | SmtpState::XclientFrom => external_state(state),
    }
}
