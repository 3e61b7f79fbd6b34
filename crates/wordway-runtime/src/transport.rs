//! Native messaging transport.
//!
//! Each frame is a 4-byte length in native byte order followed by that many
//! bytes of UTF-8 JSON. Inbound frames carry `{ id, method, arguments }`;
//! outbound frames are `{ id, response }`, `{ id, error }`, or `{ id }` for a
//! message that completed without a payload. Messages with an unsupported
//! method get no outbound frame at all.
//!
//! The wire `id` may be any JSON value and is echoed back unchanged. Frames
//! without one are answered with the broker's own correlation id.

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use wordway_core::message::{Message, Response};
use wordway_core::{ApiError, Result, WordwayError};

use crate::pending::Settlement;
use crate::service::BrokerHandle;

/// Largest frame accepted from the browser.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest frame the browser accepts from us.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

// ── Framing ───────────────────────────────────────────────────────────────────

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME {
        return Err(WordwayError::FrameTooLarge {
            len,
            limit: MAX_INBOUND_FRAME,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_OUTBOUND_FRAME {
        return Err(WordwayError::FrameTooLarge {
            len: payload.len(),
            limit: MAX_OUTBOUND_FRAME,
        });
    }
    writer
        .write_all(&(payload.len() as u32).to_ne_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// ── Frame bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    /// Echoed back on the outbound frame. Allocated by the broker when absent.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl InboundFrame {
    pub fn into_message(self) -> (Option<Value>, Message) {
        (
            self.id,
            Message {
                method: self.method,
                arguments: self.arguments,
            },
        )
    }
}

/// The outbound JSON for a settled slot, or `None` when nothing is sent.
pub fn outbound_frame(id: Value, settlement: Settlement) -> Option<Value> {
    let mut frame = Map::new();
    frame.insert("id".to_string(), id);
    match settlement {
        Settlement::Responded(response) => {
            frame.insert(response.key().to_string(), response.value().clone());
        }
        Settlement::Completed => {}
        Settlement::Abandoned => return None,
    }
    Some(Value::Object(frame))
}

/// Serialise `frame`, replacing it with an error if it cannot be delivered.
fn encode_outbound(id: &Value, frame: &Value) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() <= MAX_OUTBOUND_FRAME {
        return Ok(bytes);
    }

    warn!(%id, len = bytes.len(), "response exceeds frame limit; sending error instead");
    let error = Response::Error(
        ApiError::Internal {
            message: format!(
                "response of {} bytes exceeds the {} byte limit",
                bytes.len(),
                MAX_OUTBOUND_FRAME
            ),
        }
        .to_value(),
    );
    let replacement = outbound_frame(id.clone(), Settlement::Responded(error)).unwrap_or(Value::Null);
    Ok(serde_json::to_vec(&replacement)?)
}

// ── serve ─────────────────────────────────────────────────────────────────────

/// Pump frames between `reader`/`writer` and the broker until end of input.
///
/// Every message is answered from its own task; a single writer task owns
/// `writer`, so completions never interleave. On end of input the call
/// waits for outstanding messages to settle and their frames to be written.
pub async fn serve<R, W>(mut reader: R, writer: W, handle: BrokerHandle) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_task = tokio::spawn(writer_loop(writer, out_rx));

    let outcome = loop {
        let payload = match read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("native messaging input closed");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let inbound: InboundFrame = match serde_json::from_slice(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "skipping malformed frame");
                continue;
            }
        };

        let (wire_id, message) = inbound.into_message();
        let pending = match handle.send(message) {
            Ok(pending) => pending,
            Err(e) => break Err(e),
        };
        let id = wire_id.unwrap_or_else(|| Value::from(pending.id()));

        let out = out_tx.clone();
        tokio::spawn(async move {
            let Some(frame) = outbound_frame(id.clone(), pending.await) else {
                return;
            };
            match encode_outbound(&id, &frame) {
                Ok(bytes) => {
                    let _ = out.send(bytes);
                }
                Err(e) => error!(%id, error = %e, "failed to encode response"),
            }
        });
    };

    drop(out_tx);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "native messaging output failed"),
        Err(e) => error!(error = %e, "native messaging writer task failed"),
    }
    outcome
}

async fn writer_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        write_frame(&mut writer, &bytes).await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
