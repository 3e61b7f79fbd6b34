//! User-facing session notices.
//!
//! Turns a transition of the `loggedInUser` slot into the notice a settings
//! surface shows the user. A logout that the observer forced because the
//! token expired is deliberately silent here: the expiry itself has already
//! been announced with [`SessionNotice::SessionExpired`].

use std::fmt;

use crate::models::User;

// ── SessionNotice ─────────────────────────────────────────────────────────────

/// A session event worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A user record appeared where there was none.
    SignedIn { name: Option<String> },
    /// The user signed out on purpose.
    SignedOut,
    /// The stored token has expired; the user must sign in again.
    SessionExpired,
}

impl SessionNotice {
    /// Short message suitable for a toast or a log line.
    pub fn message(&self) -> String {
        match self {
            SessionNotice::SignedIn { name: Some(name) } => format!("Signed in as {name}"),
            SessionNotice::SignedIn { name: None } => "Signed in".to_string(),
            SessionNotice::SignedOut => "Signed out".to_string(),
            SessionNotice::SessionExpired => {
                "Your session has expired, please sign in again.".to_string()
            }
        }
    }
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// Decide which notice, if any, a `loggedInUser` transition produces.
///
/// `expiry_forced` is `true` when the observer itself cleared the user after
/// detecting an expired token.
pub fn classify_transition(
    previous: Option<&User>,
    next: Option<&User>,
    expiry_forced: bool,
) -> Option<SessionNotice> {
    match (previous, next) {
        (None, Some(user)) => Some(SessionNotice::SignedIn {
            name: user.display_name().map(str::to_string),
        }),
        (Some(_), None) if expiry_forced => None,
        (Some(_), None) => Some(SessionNotice::SignedOut),
        _ => None,
    }
}
