//! Close-cause classification.
//!
//! The transport reports closes with protocol status codes. This is the
//! single place those codes are interpreted; the connection manager's state
//! machine only ever sees the closed [`CloseClass`] set.

use super::traits::CloseReason;

/// Status code the network uses for an explicit device logout.
const CODE_LOGGED_OUT: u16 = 401;

/// Status code for an account ban.
const CODE_BANNED: u16 = 403;

/// Status code for a transient stream error that resolves on reconnect.
const CODE_RESTART_REQUIRED: u16 = 515;

/// What a close means for the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseClass {
    /// The user or device logged out. Terminal for the credential set.
    LoggedOut,

    /// Transient protocol condition; reconnect immediately, no demotion.
    RestartRequired,

    /// The account was banned. Terminal, no reconnection.
    Banned,

    /// Anything else: treat as a transient network failure and back off.
    Other(String),
}

/// Translate a raw close reason into its state-machine meaning.
pub fn classify_close(reason: &CloseReason) -> CloseClass {
    match reason.code {
        Some(CODE_LOGGED_OUT) => CloseClass::LoggedOut,
        Some(CODE_RESTART_REQUIRED) => CloseClass::RestartRequired,
        Some(CODE_BANNED) => CloseClass::Banned,
        _ => CloseClass::Other(if reason.message.is_empty() {
            "connection closed".to_string()
        } else {
            reason.message.clone()
        }),
    }
}
