use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::protocol::{Envelope, PushMessage};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{SyncError, SyncResult},
    event_bus::EventBus,
};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Outbound side of the push channel as seen by the board state machine.
pub trait PushSink: Send + Sync {
    /// Returns whether the message was queued; nothing is queued while the channel is down.
    fn send(&self, message: &PushMessage) -> bool;
}

pub struct MissingPushSink;

impl PushSink for MissingPushSink {
    fn send(&self, _message: &PushMessage) -> bool {
        false
    }
}

/// `http://host:port/...` -> `ws://host:port/ws`, `https` -> `wss`.
pub fn ws_url_from_origin(origin: &str) -> SyncResult<Url> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::Transport(format!(
                "origin must be http(s) or ws(s), got {other}://"
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        SyncError::Transport(format!("cannot derive websocket url from {origin}"))
    })?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub struct PushTransport {
    url: Url,
    reconnect_delay: Duration,
    bus: EventBus,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    connections: AtomicU64,
}

impl PushTransport {
    pub fn new(url: Url, reconnect_delay: Duration, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            url,
            reconnect_delay,
            bus,
            outbound: Mutex::new(None),
            task: Mutex::new(None),
            connections: AtomicU64::new(0),
        })
    }

    pub fn for_origin(
        origin: &str,
        reconnect_delay: Duration,
        bus: EventBus,
    ) -> SyncResult<Arc<Self>> {
        Ok(Self::new(ws_url_from_origin(origin)?, reconnect_delay, bus))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_open(&self) -> bool {
        self.outbound().is_some()
    }

    /// Number of successful handshakes so far, reconnects included.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Starts the connect/read/reconnect loop. Calling it again while running is a no-op.
    pub fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let transport = Arc::clone(self);
        *task = Some(tokio::spawn(async move { transport.run().await }));
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.outbound().take();
    }

    /// Queues `{type, data}` if the channel is open, otherwise drops it.
    pub fn send_raw(&self, kind: &str, data: Value) -> bool {
        match serde_json::to_string(&Envelope::new(kind, data)) {
            Ok(frame) => self.send_frame(frame),
            Err(err) => {
                warn!(error = %err, kind, "push: failed to encode frame");
                false
            }
        }
    }

    fn send_frame(&self, frame: String) -> bool {
        let guard = self.outbound();
        let Some(sender) = guard.as_ref() else {
            debug!("push: channel closed, dropping outbound frame");
            return false;
        };
        sender.send(Message::Text(frame)).is_ok()
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>) {
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    self.connections.fetch_add(1, Ordering::Relaxed);
                    info!(url = %self.url, "push: connected");
                    let (mut writer, mut reader) = stream.split();
                    let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
                    *self.outbound() = Some(sender);

                    let writer_task = tokio::spawn(async move {
                        while let Some(message) = receiver.recv().await {
                            if let Err(err) = writer.send(message).await {
                                warn!(error = %err, "push: write failed");
                                break;
                            }
                        }
                    });

                    while let Some(frame) = reader.next().await {
                        match frame {
                            Ok(Message::Text(text)) => {
                                self.bus.publish_frame(&text);
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(err) => {
                                warn!(error = %err, "push: receive failed");
                                break;
                            }
                        }
                    }

                    self.outbound().take();
                    writer_task.abort();
                }
                Err(err) => {
                    warn!(url = %self.url, error = %err, "push: connect failed");
                }
            }
            info!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "push: channel closed, reconnecting"
            );
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}

impl PushSink for PushTransport {
    fn send(&self, message: &PushMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(frame) => self.send_frame(frame),
            Err(err) => {
                warn!(error = %err, kind = message.kind(), "push: failed to encode frame");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
