use crate::model::ConnectionState;
use crate::protocol::{
    version_banner_len, SECURITY_NONE, SECURITY_RESULT_OK, SECURITY_TYPES, SERVER_INIT,
    VERSION_PREFIX,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub reply: Option<Vec<u8>>,
    pub consumed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Advance(Transition),
    NeedMore,
    Unexpected,
}

// Markers can arrive split across reads or several in one read; the caller
// keeps the unconsumed remainder and steps again after each advance.
pub fn step(state: ConnectionState, inbound: &[u8]) -> Step {
    match state {
        ConnectionState::Disconnected => banner(inbound),
        ConnectionState::Connecting => marker(
            inbound,
            &SECURITY_TYPES,
            ConnectionState::Authenticating,
            Some(SECURITY_NONE.to_vec()),
        ),
        ConnectionState::Authenticating => marker(
            inbound,
            &SECURITY_RESULT_OK,
            ConnectionState::Authenticated,
            None,
        ),
        ConnectionState::Authenticated => {
            marker(inbound, &SERVER_INIT, ConnectionState::Connected, None)
        }
        ConnectionState::Connected => Step::Unexpected,
    }
}

fn banner(inbound: &[u8]) -> Step {
    if inbound.len() < VERSION_PREFIX.len() {
        return if VERSION_PREFIX.starts_with(inbound) {
            Step::NeedMore
        } else {
            Step::Unexpected
        };
    }
    if !inbound.starts_with(VERSION_PREFIX) {
        return Step::Unexpected;
    }
    match version_banner_len(inbound) {
        Some(len) => Step::Advance(Transition {
            next: ConnectionState::Connecting,
            reply: Some(inbound[..len].to_vec()),
            consumed: len,
        }),
        None => Step::NeedMore,
    }
}

fn marker(
    inbound: &[u8],
    expected: &[u8],
    next: ConnectionState,
    reply: Option<Vec<u8>>,
) -> Step {
    if inbound.starts_with(expected) {
        Step::Advance(Transition {
            next,
            reply,
            consumed: expected.len(),
        })
    } else if expected.starts_with(inbound) {
        Step::NeedMore
    } else {
        Step::Unexpected
    }
}
