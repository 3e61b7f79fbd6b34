//! Session observer.
//!
//! Watches the `loggedInUser` slot of the shared config and reports sign-in,
//! sign-out and token expiry as [`SessionNotice`]s. It is the headless
//! counterpart of the settings page: the binary logs each notice where a
//! browser would show a toast.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};
use wordway_core::models::{Config, User};
use wordway_core::notifications::{classify_transition, SessionNotice};
use wordway_core::time_utils::{is_token_expired, token_expiry};
use wordway_core::{Result, WordwayError};

use crate::config_manager::{ConfigListener, ConfigManager, Subscription};

#[derive(Default)]
struct ObserverState {
    logged_in_user: Option<User>,
    /// Set when this observer cleared the user because the token expired.
    /// Consumed by the next transition to "no user".
    expiry_forced: bool,
}

pub struct SessionObserver {
    manager: Weak<ConfigManager>,
    state: parking_lot::Mutex<ObserverState>,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl SessionObserver {
    /// Register a new observer with `manager`.
    ///
    /// The observer stays registered for as long as the returned
    /// [`Subscription`] lives. Notices arrive on the returned receiver.
    pub fn attach(
        manager: &Arc<ConfigManager>,
    ) -> (
        Arc<SessionObserver>,
        Subscription,
        mpsc::UnboundedReceiver<SessionNotice>,
    ) {
        let (notices, rx) = mpsc::unbounded_channel();
        let observer = Arc::new(SessionObserver {
            manager: Arc::downgrade(manager),
            state: parking_lot::Mutex::new(ObserverState::default()),
            notices,
        });
        let subscription = manager.add_listener(observer.clone());
        (observer, subscription, rx)
    }

    /// The user as of the last config change this observer saw.
    pub fn logged_in_user(&self) -> Option<User> {
        self.state.lock().logged_in_user.clone()
    }

    /// Read the current config and force a logout if the token has expired.
    ///
    /// Returns `true` when a logout was forced. The user is told once, with
    /// [`SessionNotice::SessionExpired`]; the logout that follows is silent.
    pub async fn check_session(&self) -> Result<bool> {
        let manager = self.manager.upgrade().ok_or(WordwayError::ManagerClosed)?;
        let config = manager.get_config().await?;

        let expired_user = config
            .logged_in_user
            .clone()
            .filter(is_token_expired);
        {
            let mut state = self.state.lock();
            state.logged_in_user = config.logged_in_user;
            state.expiry_forced = expired_user.is_some();
        }

        let Some(user) = expired_user else {
            debug!("session check passed");
            return Ok(false);
        };

        info!(expired_at = ?token_expiry(&user), "session token expired; signing out");
        self.emit(SessionNotice::SessionExpired);
        if let Err(e) = manager.set_logged_in_user(None).await {
            // The user is still recorded, so a later logout is theirs to announce.
            self.state.lock().expiry_forced = false;
            return Err(e);
        }
        Ok(true)
    }

    fn emit(&self, notice: SessionNotice) {
        if self.notices.send(notice).is_err() {
            debug!("session notice receiver dropped");
        }
    }
}

impl ConfigListener for SessionObserver {
    fn on_config_change(&self, config: &Config) {
        let notice = {
            let mut state = self.state.lock();
            let next = config.logged_in_user.clone();
            let notice = classify_transition(
                state.logged_in_user.as_ref(),
                next.as_ref(),
                state.expiry_forced,
            );
            if next.is_none() {
                state.expiry_forced = false;
            }
            state.logged_in_user = next;
            notice
        };

        if let Some(notice) = notice {
            self.emit(notice);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
