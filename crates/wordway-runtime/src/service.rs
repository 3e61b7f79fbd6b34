//! Background dispatch loop for the [`Broker`].
//!
//! [`BrokerService::start`] spawns a tokio task that receives messages from
//! any number of [`BrokerHandle`]s and dispatches them strictly in arrival
//! order. Handlers that do asynchronous work spawn their own tasks, so a slow
//! API request never holds up the messages behind it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};
use wordway_core::message::Message;
use wordway_core::{Result, WordwayError};

use crate::broker::Broker;
use crate::pending::{slot, CorrelationId, PendingResponse, Responder};

struct Envelope {
    message: Message,
    responder: Responder,
}

// ── BrokerService ─────────────────────────────────────────────────────────────

pub struct BrokerService {
    broker: Arc<Broker>,
}

impl BrokerService {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Spawn the dispatch loop.
    ///
    /// Returns a cloneable [`BrokerHandle`] for submitting messages and a
    /// [`BrokerTask`] that can stop the loop. The loop also exits on its own
    /// once every handle has been dropped.
    pub fn start(self) -> (BrokerHandle, BrokerTask) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.dispatch_loop(rx));

        (
            BrokerHandle {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            BrokerTask { handle },
        )
    }

    async fn dispatch_loop(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(Envelope { message, responder }) = rx.recv().await {
            let id = responder.id();
            let will_respond = catch_unwind(AssertUnwindSafe(|| {
                self.broker.handle_message(message, responder)
            }));
            match will_respond {
                Ok(will_respond) => trace!(id, will_respond, "message dispatched"),
                Err(_) => error!(id, "message handler panicked; slot abandoned"),
            }
        }
        debug!("broker dispatch loop stopped");
    }
}

// ── BrokerHandle ──────────────────────────────────────────────────────────────

/// Submits messages to a running [`BrokerService`].
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    next_id: Arc<AtomicU64>,
}

impl BrokerHandle {
    /// Queue `message` under a freshly allocated correlation id.
    pub fn send(&self, message: Message) -> Result<PendingResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send_with_id(id, message)
    }

    /// Queue `message` under a caller-chosen correlation id.
    ///
    /// Ids are echoed back verbatim and never checked for uniqueness.
    pub fn send_with_id(&self, id: CorrelationId, message: Message) -> Result<PendingResponse> {
        let (responder, pending) = slot(id);
        self.tx
            .send(Envelope { message, responder })
            .map_err(|_| WordwayError::BrokerClosed)?;
        Ok(pending)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── BrokerTask ────────────────────────────────────────────────────────────────

/// The background dispatch task.
pub struct BrokerTask {
    handle: tokio::task::JoinHandle<()>,
}

impl BrokerTask {
    /// Stop dispatching. Slots already handed to handlers still settle.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::ApiClient;
    use crate::config_manager::ConfigManager;
    use crate::host::{Host, HostEvent, RecordingHost};
    use crate::pending::Settlement;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use wordway_core::message::{Method, Response};
    use wordway_core::ApiError;
    use wordway_store::MemoryStore;

    // ── helpers ───────────────────────────────────────────────────────────

    struct StaticApi;

    #[async_trait]
    impl ApiClient for StaticApi {
        async fn request(&self, arguments: Value, _use_cache: bool) -> std::result::Result<Value, ApiError> {
            Ok(json!({ "for": arguments["url"] }))
        }
    }

    /// Panics when asked to play audio.
    struct BrokenHost;

    impl Host for BrokenHost {
        fn open_options_page(&self) {}

        fn play_audio(&self, _url: &str) {
            panic!("no audio device");
        }
    }

    fn start_with_host(host: Arc<dyn Host>) -> (BrokerHandle, BrokerTask, Arc<ConfigManager>) {
        let config = ConfigManager::start(Arc::new(MemoryStore::new()));
        let broker = Broker::new(Arc::new(StaticApi), config.clone(), host);
        let (handle, task) = BrokerService::new(Arc::new(broker)).start();
        (handle, task, config)
    }

    // ── dispatch ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_allocates_increasing_ids() {
        let (handle, task, _) = start_with_host(Arc::new(RecordingHost::new()));
        let a = handle.send(Message::new(Method::OpenOptionsPage, Value::Null)).unwrap();
        let b = handle.clone().send(Message::new(Method::OpenOptionsPage, Value::Null)).unwrap();
        assert!(b.id() > a.id());
        task.abort();
    }

    #[tokio::test]
    async fn test_send_with_id_echoes_id() {
        let (handle, task, _) = start_with_host(Arc::new(RecordingHost::new()));
        let pending = handle
            .send_with_id(42, Message::new(Method::Request, json!({ "url": "/w/hello" })))
            .unwrap();
        assert_eq!(pending.id(), 42);
        assert_eq!(
            pending.await,
            Settlement::Responded(Response::Response(json!({ "for": "/w/hello" })))
        );
        task.abort();
    }

    #[tokio::test]
    async fn test_dispatch_preserves_arrival_order() {
        let host = Arc::new(RecordingHost::new());
        let (handle, task, _) = start_with_host(host.clone());

        let mut pending = Vec::new();
        for n in 0..5 {
            let url = format!("https://a/{n}.mp3");
            pending.push(
                handle
                    .send(Message::new(Method::PlayAudio, json!({ "url": url })))
                    .unwrap(),
            );
        }
        for p in pending {
            p.await;
        }

        let expected: Vec<HostEvent> = (0..5)
            .map(|n| HostEvent::PlayAudio(format!("https://a/{n}.mp3")))
            .collect();
        assert_eq!(host.events(), expected);
        task.abort();
    }

    #[tokio::test]
    async fn test_unknown_method_is_abandoned() {
        let (handle, task, _) = start_with_host(Arc::new(RecordingHost::new()));
        let message = Message {
            method: "lookupWord".to_string(),
            arguments: Value::Null,
        };
        assert_eq!(handle.send(message).unwrap().await, Settlement::Abandoned);
        task.abort();
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_loop() {
        let (handle, task, config) = start_with_host(Arc::new(BrokenHost));

        let broken = handle
            .send(Message::new(Method::PlayAudio, json!({ "url": "https://a/x.mp3" })))
            .unwrap();
        assert_eq!(broken.await, Settlement::Abandoned);

        let logout = handle
            .send(Message::new(Method::AccountLogout, Value::Null))
            .unwrap();
        assert_eq!(logout.await, Settlement::Completed);
        assert!(config.get_config().await.unwrap().access_token.is_none());
        task.abort();
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_abort_closes_handle() {
        let (handle, task, _) = start_with_host(Arc::new(RecordingHost::new()));
        task.abort();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task did not stop");

        assert!(handle.is_closed());
        let err = handle
            .send(Message::new(Method::OpenOptionsPage, Value::Null))
            .unwrap_err();
        assert!(matches!(err, WordwayError::BrokerClosed));
    }

    #[tokio::test]
    async fn test_loop_exits_when_handles_dropped() {
        let (handle, task, _) = start_with_host(Arc::new(RecordingHost::new()));
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("loop did not exit");
    }
}
