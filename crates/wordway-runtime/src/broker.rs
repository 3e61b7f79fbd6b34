//! Background message broker.
//!
//! Classifies each inbound [`Message`] by method and hands it to one of a
//! fixed set of handlers. [`Broker::handle_message`] answers up front whether
//! the message's slot will be settled later:
//!
//! | method            | work                                   | slot                  |
//! |-------------------|----------------------------------------|-----------------------|
//! | `request`         | `ApiClient::request(args, false)`      | `{response}`/`{error}`|
//! | `openOptionsPage` | `Host::open_options_page`              | completed             |
//! | `playAudio`       | `Host::play_audio(args.url)`           | completed             |
//! | `accountLogin`    | `ConfigManager::save(args)`            | completed after commit|
//! | `accountLogout`   | save `{accessToken: null, loggedInUser: null}` | completed after commit |
//! | anything else     | logged                                 | abandoned, `false`    |
//!
//! Only `request` reports failure to the sender. Config writes are queued
//! during dispatch, so broker-originated writes commit in arrival order.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use wordway_core::message::{Message, Method, Response};
use wordway_core::models::ConfigPatch;
use wordway_core::ApiError;

use crate::api_client::ApiClient;
use crate::config_manager::ConfigManager;
use crate::host::Host;
use crate::pending::Responder;

pub struct Broker {
    api: Arc<dyn ApiClient>,
    config: Arc<ConfigManager>,
    host: Arc<dyn Host>,
}

impl Broker {
    pub fn new(api: Arc<dyn ApiClient>, config: Arc<ConfigManager>, host: Arc<dyn Host>) -> Self {
        Self { api, config, host }
    }

    /// Dispatch one message.
    ///
    /// Returns `true` when `responder` has been handed to a handler and will
    /// be settled or completed, `false` for unsupported methods (the
    /// responder is dropped and nothing else happens).
    pub fn handle_message(&self, message: Message, responder: Responder) -> bool {
        let method = match message.classify() {
            Ok(method) => method,
            Err(unknown) => {
                warn!(method = %unknown.0, id = responder.id(), "Message not supported");
                return false;
            }
        };

        debug!(%method, id = responder.id(), "dispatching message");
        match method {
            Method::Request => self.handle_request(message.arguments, responder),
            Method::OpenOptionsPage => self.handle_open_options_page(responder),
            Method::PlayAudio => self.handle_play_audio(&message.arguments, responder),
            Method::AccountLogin => self.handle_account_login(message.arguments, responder),
            Method::AccountLogout => self.handle_account_logout(responder),
        }
        true
    }

    // ── Handlers ──────────────────────────────────────────────────────────

    fn handle_request(&self, arguments: Value, responder: Responder) {
        let api = Arc::clone(&self.api);
        let id = responder.id();

        tokio::spawn(async move {
            // Run the client in its own task so a panic still settles the slot.
            let outcome = tokio::spawn(async move { api.request(arguments, false).await }).await;

            let response = match outcome {
                Ok(Ok(value)) => Response::Response(value),
                Ok(Err(e)) => {
                    debug!(id, error = %e, "request failed");
                    Response::Error(e.to_value())
                }
                Err(join_err) => {
                    error!(id, error = %join_err, "API client task failed");
                    Response::Error(
                        ApiError::Internal {
                            message: join_err.to_string(),
                        }
                        .to_value(),
                    )
                }
            };

            if !responder.settle(response) {
                debug!(id, "sender went away before the response was ready");
            }
        });
    }

    fn handle_open_options_page(&self, responder: Responder) {
        self.host.open_options_page();
        responder.complete();
    }

    fn handle_play_audio(&self, arguments: &Value, responder: Responder) {
        match arguments.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => self.host.play_audio(url),
            _ => warn!(id = responder.id(), "playAudio without a url; ignoring"),
        }
        responder.complete();
    }

    fn handle_account_login(&self, arguments: Value, responder: Responder) {
        let patch = match ConfigPatch::from_value(arguments) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(id = responder.id(), error = %e, "accountLogin payload rejected");
                responder.complete();
                return;
            }
        };
        self.commit(patch, "account login stored", responder);
    }

    fn handle_account_logout(&self, responder: Responder) {
        self.commit(ConfigPatch::logout(), "account session cleared", responder);
    }

    /// Queue `patch` now, complete `responder` once it has been committed.
    fn commit(&self, patch: ConfigPatch, done: &'static str, responder: Responder) {
        let pending = self.config.save(patch);
        let id = responder.id();

        tokio::spawn(async move {
            match pending.await {
                Ok(_) => info!(id, "{done}"),
                Err(e) => error!(id, error = %e, "config write from broker failed"),
            }
            responder.complete();
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_manager::ConfigListener;
    use crate::host::{HostEvent, RecordingHost};
    use crate::pending::{slot, Settlement};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wordway_core::models::Config;
    use wordway_store::MemoryStore;

    // ── fakes ─────────────────────────────────────────────────────────────

    /// Echoes the arguments back, fails when they contain `"fail": true`,
    /// panics when they contain `"panic": true`.
    #[derive(Default)]
    struct EchoApi {
        calls: AtomicUsize,
        saw_cache: parking_lot::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ApiClient for EchoApi {
        async fn request(&self, arguments: Value, use_cache: bool) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.saw_cache.lock().push(use_cache);
            if let Some(ms) = arguments.get("delayMs").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if arguments.get("panic") == Some(&json!(true)) {
                panic!("client bug");
            }
            if arguments.get("fail") == Some(&json!(true)) {
                return Err(ApiError::Status {
                    status: 500,
                    body: json!("upstream down"),
                });
            }
            Ok(json!({ "echo": arguments }))
        }
    }

    struct Fixture {
        broker: Broker,
        api: Arc<EchoApi>,
        host: Arc<RecordingHost>,
        store: Arc<MemoryStore>,
        config: Arc<ConfigManager>,
    }

    fn fixture_with_store(store: MemoryStore) -> Fixture {
        let api = Arc::new(EchoApi::default());
        let host = Arc::new(RecordingHost::new());
        let store = Arc::new(store);
        let config = ConfigManager::start(store.clone());
        let broker = Broker::new(api.clone(), config.clone(), host.clone());
        Fixture {
            broker,
            api,
            host,
            store,
            config,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_store(MemoryStore::new())
    }

    fn login_arguments() -> Value {
        json!({
            "accessToken": "tok-1",
            "loggedInUser": {
                "name": "Lin",
                "email": "lin@example.com",
                "jwtToken": { "accessToken": "jwt-1", "expiresIn": 1_900_000_000 }
            }
        })
    }

    fn send(f: &Fixture, id: u64, method: &str, arguments: Value) -> (bool, crate::pending::PendingResponse) {
        let (responder, pending) = slot(id);
        let message = Message {
            method: method.to_string(),
            arguments,
        };
        (f.broker.handle_message(message, responder), pending)
    }

    // ── unsupported ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_method_has_no_response_and_no_side_effect() {
        let f = fixture();
        for method in ["translate", "", "REQUEST", "account_login"] {
            let (will_respond, pending) = send(&f, 1, method, json!({ "url": "x" }));
            assert!(!will_respond);
            assert_eq!(pending.await, Settlement::Abandoned);
        }
        assert_eq!(f.api.calls.load(Ordering::SeqCst), 0);
        assert!(f.host.events().is_empty());
        assert_eq!(f.store.write_count(), 0);
    }

    // ── request ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_request_success_yields_response() {
        let f = fixture();
        let (will_respond, pending) = send(&f, 1, "request", json!({ "url": "/w" }));
        assert!(will_respond);
        assert_eq!(
            pending.await,
            Settlement::Responded(Response::Response(json!({ "echo": { "url": "/w" } })))
        );
    }

    #[tokio::test]
    async fn test_request_failure_yields_error() {
        let f = fixture();
        let (_, pending) = send(&f, 1, "request", json!({ "fail": true }));
        let response = pending.await.into_response().expect("payload");
        assert_eq!(
            response,
            Response::Error(json!({ "kind": "status", "status": 500, "body": "upstream down" }))
        );
    }

    #[tokio::test]
    async fn test_request_always_disables_cache() {
        let f = fixture();
        let (_, a) = send(&f, 1, "request", json!({}));
        let (_, b) = send(&f, 2, "request", json!({ "useCache": true }));
        a.await;
        b.await;
        assert_eq!(*f.api.saw_cache.lock(), vec![false, false]);
    }

    #[tokio::test]
    async fn test_request_panic_still_settles_with_error() {
        let f = fixture();
        let (_, pending) = send(&f, 1, "request", json!({ "panic": true }));
        let response = pending.await.into_response().expect("payload");
        assert!(response.is_error());
        assert_eq!(response.value()["kind"], "internal");
    }

    #[tokio::test]
    async fn test_requests_complete_out_of_order() {
        let f = fixture();
        let (_, slow) = send(&f, 1, "request", json!({ "delayMs": 50 }));
        let (_, fast) = send(&f, 2, "playAudio", json!({ "url": "https://a/b.mp3" }));

        let first = tokio::select! {
            _ = slow => "slow",
            _ = fast => "fast",
        };
        assert_eq!(first, "fast");
    }

    // ── host capabilities ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_open_options_page() {
        let f = fixture();
        let (will_respond, pending) = send(&f, 1, "openOptionsPage", Value::Null);
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);
        assert_eq!(f.host.events(), vec![HostEvent::OpenOptionsPage]);
    }

    #[tokio::test]
    async fn test_play_audio() {
        let f = fixture();
        let (will_respond, pending) = send(&f, 1, "playAudio", json!({ "url": "https://a/hello.mp3" }));
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);
        assert_eq!(
            f.host.events(),
            vec![HostEvent::PlayAudio("https://a/hello.mp3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_play_audio_without_url_still_answers_async() {
        let f = fixture();
        let (will_respond, pending) = send(&f, 1, "playAudio", json!({}));
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);
        assert!(f.host.events().is_empty());
    }

    // ── account login / logout ────────────────────────────────────────────

    #[tokio::test]
    async fn test_account_login_then_get_config() {
        let mut existing = Config::default();
        existing.extra.insert("wordbookId".to_string(), json!(12));
        let f = fixture_with_store(MemoryStore::with_record(existing));

        let (will_respond, pending) = send(&f, 1, "accountLogin", login_arguments());
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);

        let config = f.config.get_config().await.unwrap();
        assert_eq!(
            serde_json::to_value(config.logged_in_user.as_ref().unwrap()).unwrap(),
            login_arguments()["loggedInUser"]
        );
        assert_eq!(config.access_token.as_deref(), Some("tok-1"));
        assert_eq!(config.extra.get("wordbookId"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn test_account_login_stores_user_verbatim() {
        let f = fixture();
        let arguments = json!({
            "accessToken": "tok-2",
            "loggedInUser": {
                "name": "Lin",
                "avatarUrl": null,
                "jwtToken": { "expiresIn": 1_900_000_000.0 }
            }
        });

        let (_, pending) = send(&f, 1, "accountLogin", arguments.clone());
        assert_eq!(pending.await, Settlement::Completed);

        let config = f.config.get_config().await.unwrap();
        assert_eq!(
            serde_json::to_value(config.logged_in_user.as_ref().unwrap()).unwrap(),
            arguments["loggedInUser"]
        );
    }

    #[tokio::test]
    async fn test_account_login_with_bad_payload_changes_nothing() {
        let f = fixture();
        let (will_respond, pending) = send(&f, 1, "accountLogin", json!("token-only"));
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_account_logout_clears_session() {
        let f = fixture();
        let (_, login) = send(&f, 1, "accountLogin", login_arguments());
        login.await;

        let (will_respond, pending) = send(&f, 2, "accountLogout", json!({}));
        assert!(will_respond);
        assert_eq!(pending.await, Settlement::Completed);

        let config = f.config.get_config().await.unwrap();
        assert!(config.logged_in_user.is_none());
        assert!(config.access_token.is_none());
    }

    #[tokio::test]
    async fn test_account_logout_when_already_signed_out() {
        let f = fixture();
        let (_, pending) = send(&f, 1, "accountLogout", Value::Null);
        pending.await;

        let config = f.config.get_config().await.unwrap();
        assert!(config.logged_in_user.is_none());
        assert!(config.access_token.is_none());
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_message_reaches_prior_listener() {
        let f = fixture();
        let seen: Arc<parking_lot::Mutex<Vec<Config>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ConfigListener> =
            Arc::new(move |config: &Config| sink.lock().push(config.clone()));
        let _sub = f.config.add_listener(listener);

        let (_, pending) = send(&f, 1, "accountLogout", json!({}));
        pending.await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            serde_json::to_value(&seen[0]).unwrap(),
            json!({ "accessToken": null, "loggedInUser": null })
        );
    }

    #[tokio::test]
    async fn test_login_then_logout_commit_in_arrival_order() {
        let f = fixture_with_store(MemoryStore::new().with_write_delay(Duration::from_millis(10)));
        let (_, login) = send(&f, 1, "accountLogin", login_arguments());
        let (_, logout) = send(&f, 2, "accountLogout", json!({}));
        login.await;
        logout.await;

        assert!(f.store.snapshot().unwrap().logged_in_user.is_none());
        assert_eq!(f.store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_reported_to_sender() {
        let f = fixture();
        f.store.set_fail_writes(true);

        let (_, pending) = send(&f, 1, "accountLogin", login_arguments());
        assert_eq!(pending.await, Settlement::Completed);
        assert!(f.config.get_config().await.unwrap().logged_in_user.is_none());
    }
}
