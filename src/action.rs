//! What an `AuthStateMachine::step` wants its caller to do next.
//!
//! Kept as a plain enum rather than threading the send/relay/hand-off
//! decision through return codes, matching the design doc's preference for
//! a flat, matchable vocabulary over callback-style control flow.

use crate::error::ProxyError;

#[derive(Debug)]
pub enum Action {
    /// Write these bytes to upstream, then reset the upstream buffer and
    /// wait for the next reply (spec.md §4.2 "After every send...").
    Send(Vec<u8>),
    /// Login is complete; hand the two connections to the relay pump.
    EnterRelay,
    /// Flush these bytes to the client verbatim, then return control to the
    /// external pre-auth parser (spec.md §4.5). The state machine does not
    /// drive anything further in this session.
    HandOff(Vec<u8>),
    /// Terminal failure; caller maps this onto `SessionOutcome`.
    Fail(ProxyError),
}
