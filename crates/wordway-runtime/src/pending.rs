//! Single-use response slots.
//!
//! Every inbound message gets a correlation id and a slot pair: the broker
//! keeps the [`Responder`], the transport keeps the [`PendingResponse`].
//! `Responder` methods take `self`, so a slot can be settled at most once.
//! The pending half resolves to a [`Settlement`] saying whether a payload was
//! delivered, the handler finished without one, or the slot was abandoned.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use wordway_core::message::Response;

/// Identifier tying a settlement back to the message that caused it.
pub type CorrelationId = u64;

// ── Settlement ────────────────────────────────────────────────────────────────

/// How a slot ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The handler delivered a payload.
    Responded(Response),
    /// The handler finished its work and has nothing to report.
    Completed,
    /// The responder was dropped unsettled: no answer will ever come.
    Abandoned,
}

impl Settlement {
    /// The payload, if one was delivered.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Settlement::Responded(response) => Some(response),
            Settlement::Completed | Settlement::Abandoned => None,
        }
    }
}

/// Create a linked responder/pending pair for message `id`.
pub fn slot(id: CorrelationId) -> (Responder, PendingResponse) {
    let (tx, rx) = oneshot::channel();
    (Responder { id, tx }, PendingResponse { id, rx })
}

// ── Responder ─────────────────────────────────────────────────────────────────

/// The settling half of a slot, owned by whichever handler runs the message.
#[derive(Debug)]
pub struct Responder {
    id: CorrelationId,
    tx: oneshot::Sender<Option<Response>>,
}

impl Responder {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Deliver `response` to the sender.
    ///
    /// Returns `false` when the sender has already gone away.
    pub fn settle(self, response: Response) -> bool {
        self.tx.send(Some(response)).is_ok()
    }

    /// Finish the slot without a payload.
    pub fn complete(self) -> bool {
        self.tx.send(None).is_ok()
    }

    /// `true` once the pending half has been dropped.
    pub fn is_sender_gone(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── PendingResponse ───────────────────────────────────────────────────────────

/// The waiting half of a slot.
///
/// A dropped [`Responder`] resolves as [`Settlement::Abandoned`].
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    rx: oneshot::Receiver<Option<Response>>,
}

impl PendingResponse {
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|settled| match settled {
            Ok(Some(response)) => Settlement::Responded(response),
            Ok(None) => Settlement::Completed,
            Err(_) => Settlement::Abandoned,
        })
    }
}
