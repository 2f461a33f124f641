//! One peer's live connection: a reader task that turns frames into
//! `MessageReceived` events, and a writer task that serializes an
//! outbound queue plus its own heartbeat ticker (§4.5, §5).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_events::{Bus, Event, EventKind};
use vigil_registry::Registry;
use vigil_types::{EndpointName, HostName, Message, Method, ObjectKey, Timestamp};

use crate::frame;

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_bytes: usize,
}

/// What's left of a connection once its tasks are running: a queue the
/// cluster router can push outbound messages onto.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub outbound: mpsc::UnboundedSender<Message>,
}

/// A received object identity for events that aren't about a particular
/// service — mirrors the synthetic key convention used for endpoint
/// state records in `vigil-registry`.
fn endpoint_object_key(name: &EndpointName) -> ObjectKey {
    ObjectKey::host(HostName(format!("endpoint:{}", name.0)))
}

/// Spawns the reader and writer tasks for `stream` and returns a handle
/// for enqueuing outbound messages. The connection tears itself down
/// (marking the endpoint disconnected) when either task exits.
pub fn spawn<S>(
    name: EndpointName,
    stream: S,
    cfg: ConnectionConfig,
    registry: Arc<Registry>,
    bus: Bus,
    shutdown: CancellationToken,
) -> ConnectionHandle
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (rd, wr) = split(stream);

    let reader_handle = tokio::spawn(reader_loop(
        name.clone(),
        rd,
        cfg,
        Arc::clone(&registry),
        bus,
        shutdown.clone(),
    ));
    let writer_handle = tokio::spawn(writer_loop(name.clone(), wr, outbound_rx, cfg, shutdown));

    let watchdog_name = name;
    let watchdog_registry = registry;
    tokio::spawn(async move {
        tokio::select! {
            _ = reader_handle => {}
            _ = writer_handle => {}
        }
        if let Err(err) = watchdog_registry.set_endpoint_connected(&watchdog_name, false).await {
            warn!(peer = %watchdog_name, %err, "failed to mark endpoint disconnected");
        }
        debug!(peer = %watchdog_name, "connection closed");
    });

    ConnectionHandle { outbound: outbound_tx }
}

async fn reader_loop<R>(
    name: EndpointName,
    mut rd: R,
    cfg: ConnectionConfig,
    registry: Arc<Registry>,
    bus: Bus,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    if let Err(err) = registry.set_endpoint_connected(&name, true).await {
        warn!(peer = %name, %err, "failed to mark endpoint connected");
    }

    loop {
        let read = tokio::time::timeout(cfg.heartbeat_timeout, frame::read_frame(&mut rd, cfg.max_frame_bytes));
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = read => result,
        };

        let frame = match frame {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                debug!(peer = %name, "peer closed connection");
                return;
            }
            Ok(Err(err)) => {
                warn!(peer = %name, %err, "frame error, closing connection");
                return;
            }
            Err(_elapsed) => {
                warn!(peer = %name, "heartbeat timeout, closing connection");
                return;
            }
        };

        let message: Message = match serde_json::from_slice(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %name, %err, "malformed message, ignoring frame");
                continue;
            }
        };

        if let Err(err) = registry.set_endpoint_last_seen(&name, Timestamp::now()).await {
            warn!(peer = %name, %err, "failed to update last_seen");
        }

        bus.publish(Event::new(
            EventKind::MessageReceived,
            endpoint_object_key(&name),
            Some(name.0.clone()),
            serde_json::to_value(&message).unwrap_or(serde_json::Value::Null),
        ));
    }
}

async fn writer_loop<W>(
    name: EndpointName,
    mut wr: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    cfg: ConnectionConfig,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut heartbeat = tokio::time::interval(cfg.heartbeat_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = heartbeat.tick() => {
                if send(&mut wr, &Message::new(Method::HeartBeat)).await.is_err() {
                    break;
                }
            }
            message = outbound_rx.recv() => {
                let Some(message) = message else { break };
                if send(&mut wr, &message).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = wr.shutdown().await;
    debug!(peer = %name, "writer loop exiting");
}

async fn send<W: AsyncWrite + Unpin>(wr: &mut W, message: &Message) -> crate::error::Result<()> {
    let payload = serde_json::to_vec(message)?;
    frame::write_frame(wr, &payload).await
}
