//! Push-notification listener.
//!
//! Holds a WebSocket open to the device and forwards the ids of scripts
//! mentioned in status notifications to the coordinator, which decides when
//! to refresh. The listener never refreshes on its own and never reports
//! errors upward: on any failure it logs, waits a fixed delay and reconnects.
//! The poll timer keeps the snapshot correct while it is down.

mod notification;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scriptsync_core::ScriptId;

pub use notification::{Notification, identify_frame, script_ids_in_frame};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state, published through [`EventListener::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not connected; waiting out the reconnect delay.
    Disconnected,
    Connecting,
    Connected,
    /// Cancelled; the task has exited and the socket is closed.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("Connection closed by device: {0}")]
    Closed(String),
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// `ws://<address>/rpc`.
    pub url: String,
    pub reconnect_delay: Duration,
    /// `src` sent in the identify frame.
    pub client_id: String,
}

/// Supervised push-notification connection for one device.
pub struct EventListener {
    config: ListenerConfig,
    triggers: mpsc::Sender<ScriptId>,
    state_tx: watch::Sender<ListenerState>,
}

impl EventListener {
    pub fn new(config: ListenerConfig, triggers: mpsc::Sender<ScriptId>) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Disconnected);
        Self {
            config,
            triggers,
            state_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    /// Run on a new task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Connect, listen and reconnect until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(url = %self.config.url, "Event listener started");
        loop {
            match self.connect_and_listen(&cancel).await {
                Ok(()) => break,
                Err(e) => {
                    self.set_state(ListenerState::Disconnected);
                    warn!(
                        url = %self.config.url,
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis(),
                        "Event listener disconnected, reconnecting"
                    );
                    tokio::select! {
                        () = sleep(self.config.reconnect_delay) => {}
                        () = cancel.cancelled() => {
                            debug!("Event listener cancelled during reconnect wait");
                            break;
                        }
                    }
                }
            }
        }
        self.set_state(ListenerState::Stopped);
        info!(url = %self.config.url, "Event listener stopped");
    }

    /// One connection. `Ok(())` means cancelled.
    async fn connect_and_listen(&self, cancel: &CancellationToken) -> Result<(), ListenerError> {
        self.set_state(ListenerState::Connecting);

        let connect = timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (mut ws, _response) = tokio::select! {
            result = connect => match result {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(ListenerError::Connect(e.to_string())),
                Err(_) => return Err(ListenerError::Connect("timed out".into())),
            },
            () = cancel.cancelled() => return Ok(()),
        };

        self.set_state(ListenerState::Connected);
        info!(url = %self.config.url, "Event listener connected");

        let identify = Message::text(identify_frame(&self.config.client_id));
        tokio::select! {
            result = ws.send(identify) => {
                result.map_err(|e| ListenerError::Transport(e.to_string()))?;
            }
            () = cancel.cancelled() => {
                close(&mut ws).await;
                return Ok(());
            }
        }

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "no reason".to_string(),
                            |f| f.reason.as_str().to_string(),
                        );
                        return Err(ListenerError::Closed(reason));
                    }
                    // Pings are answered by tungstenite; binary frames are not used.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ListenerError::Transport(e.to_string())),
                    None => return Err(ListenerError::Closed("stream ended".into())),
                },
                () = cancel.cancelled() => {
                    close(&mut ws).await;
                    return Ok(());
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        for id in script_ids_in_frame(text) {
            debug!(script_id = id, "Script status notification");
            match self.triggers.try_send(id) {
                // A full queue already guarantees a pending refresh.
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Refresh trigger channel closed");
                }
            }
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.state_tx.send_replace(state);
    }
}

/// Best-effort close handshake, bounded by [`CLOSE_TIMEOUT`].
async fn close<S>(ws: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Ok(Err(e)) = timeout(CLOSE_TIMEOUT, ws.close(None)).await {
        debug!(error = %e, "WebSocket close handshake failed");
    }
}
