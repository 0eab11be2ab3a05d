//! POP3 auth state machine: `pop3_start -> pop3_user -> pop3_passwd -> relay`.

use crate::action::Action;
use crate::protocol::Pop3State;
use crate::secret::SecretBytes;

/// Called once the classifier has graded the reply for `state` as `Ok`.
/// Returns the action to take and, unless the action is terminal, the
/// state to classify the next reply against.
pub fn step(state: Pop3State, login: &[u8], passwd: &SecretBytes) -> (Action, Option<Pop3State>) {
    match state {
        Pop3State::Start => {
            let mut cmd = Vec::with_capacity(login.len() + 7);
            cmd.extend_from_slice(b"USER ");
            cmd.extend_from_slice(login);
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(Pop3State::User))
        }
        Pop3State::User => {
            let pw = passwd.as_bytes();
            let mut cmd = Vec::with_capacity(pw.len() + 7);
            cmd.extend_from_slice(b"PASS ");
            cmd.extend_from_slice(pw);
            cmd.extend_from_slice(b"\r\n");
            (Action::Send(cmd), Some(Pop3State::Passwd))
        }
        Pop3State::Passwd => (Action::EnterRelay, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence() {
        let login = b"alice";
        let passwd = SecretBytes::new(b"secret".to_vec());

        let (action, next) = step(Pop3State::Start, login, &passwd);
        assert!(matches!(action, Action::Send(cmd) if cmd == b"USER alice\r\n"));
        assert_eq!(next, Some(Pop3State::User));

        let (action, next) = step(Pop3State::User, login, &passwd);
        assert!(matches!(action, Action::Send(cmd) if cmd == b"PASS secret\r\n"));
        assert_eq!(next, Some(Pop3State::Passwd));

        let (action, next) = step(Pop3State::Passwd, login, &passwd);
        assert!(matches!(action, Action::EnterRelay));
        assert_eq!(next, None);
    }
}
