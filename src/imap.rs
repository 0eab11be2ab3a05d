//! IMAP auth state machine.
//!
//! Two entry paths share the same four states (spec.md §4.3):
//! - fast path: `imap_start -> imap_passwd -> relay`, sending the whole
//!   `LOGIN <login> <passwd>` command in one line.
//! - literal path: `imap_start -> imap_login -> imap_user -> imap_passwd ->
//!   relay`, sending the login and password as separate IMAP literals, each
//!   gated by a `+` continuation.
//!
//! Which path is in play is decided by the pre-auth layer before
//! `proxy_init` and expressed purely by which state the session starts in;
//! this module honours whichever state it is handed (spec.md §4.3
//! parenthetical).

use crate::action::Action;
use crate::protocol::ImapState;
use crate::secret::SecretBytes;

pub fn step(
    state: ImapState,
    tag: &[u8],
    login: &[u8],
    passwd: &SecretBytes,
) -> (Action, Option<ImapState>) {
    match state {
        ImapState::Start => {
            let mut cmd = Vec::with_capacity(tag.len() + login.len() + passwd.len() + 10);
            cmd.extend_from_slice(tag);
            cmd.extend_from_slice(b"LOGIN ");
            cmd.extend_from_slice(login);
            cmd.push(b' ');
            cmd.extend_from_slice(passwd.as_bytes());
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(ImapState::Passwd))
        }
        ImapState::Login => {
            let len_tag = format!("{{{}}}", passwd.len());
            let mut cmd = Vec::with_capacity(login.len() + len_tag.len() + 3);
            cmd.extend_from_slice(login);
            cmd.push(b' ');
            cmd.extend_from_slice(len_tag.as_bytes());
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(ImapState::User))
        }
        ImapState::User => {
            let pw = passwd.as_bytes();
            let mut cmd = Vec::with_capacity(pw.len() + 2);
            cmd.extend_from_slice(pw);
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(ImapState::Passwd))
        }
        ImapState::Passwd => (Action::EnterRelay, None),
    }
}
