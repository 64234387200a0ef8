//! Client Facade: the public surface embedders drive.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::ProtocolError;
use crate::playable::{Playable, PlayableQueue};
use crate::session::{self, ServerInfo};
use crate::state::{OneShot, SecretKeyCell};
use crate::ws_write::WsWriter;

/// Long-lived session handle. Created by the embedding host, destroyed on
/// `disconnect`.
pub struct Client {
    user_id: String,
    guild_id: String,
    session_id: String,
    secret_key: Arc<SecretKeyCell>,
    queue: Arc<PlayableQueue>,
    close: Arc<OneShot>,
    ready: Arc<OneShot>,
    current_ws: Arc<Mutex<Option<WsWriter>>>,
    server_info_tx: Sender<ServerInfo>,
    server_info_rx: Mutex<Option<crossbeam_channel::Receiver<ServerInfo>>>,
    started: Mutex<bool>,
}

impl Client {
    pub fn new(user_id: String, guild_id: String, session_id: String) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            user_id,
            guild_id,
            session_id,
            secret_key: Arc::new(SecretKeyCell::new()),
            queue: Arc::new(PlayableQueue::new()),
            close: Arc::new(OneShot::new()),
            ready: Arc::new(OneShot::new()),
            current_ws: Arc::new(Mutex::new(None)),
            server_info_tx: tx,
            server_info_rx: Mutex::new(Some(rx)),
            started: Mutex::new(false),
        }
    }

    /// Idempotent start of the supervisor.
    pub fn run(&self) {
        let mut started = self.started.lock();
        if *started {
            return;
        }
        *started = true;
        let rx = self
            .server_info_rx
            .lock()
            .take()
            .expect("server_info_rx consumed exactly once, guarded by `started`");
        session::start(
            self.user_id.clone(),
            self.guild_id.clone(),
            self.session_id.clone(),
            rx,
            Arc::clone(&self.current_ws),
            Arc::clone(&self.secret_key),
            Arc::clone(&self.queue),
            Arc::clone(&self.close),
            Arc::clone(&self.ready),
        );
    }

    /// Enqueues a `ServerInfo` update; blocks until the supervisor accepts
    /// it. If `run()` was never called, this blocks indefinitely — a known
    /// contract for callers, not a runtime error.
    pub fn update_server_info(&self, endpoint: String, token: String) -> Result<(), ProtocolError> {
        self.server_info_tx
            .send(ServerInfo { endpoint, token })
            .map_err(|_| ProtocolError::ChannelClosed)
    }

    /// Writes op-5 SPEAKING under the ws-write mutex, if a websocket is
    /// currently connected.
    pub fn set_speaking(&self, speaking: bool) -> Result<(), ProtocolError> {
        match self.current_ws.lock().as_ref() {
            Some(ws) => ws.send_speaking(speaking),
            None => Err(ProtocolError::ChannelClosed),
        }
    }

    /// Blocks until the ready signal fires; returns immediately thereafter.
    /// If `disconnect()` fires before the RTP sender's warm-up completes,
    /// this can block forever — callers that race disconnect against
    /// readiness must account for that.
    pub fn wait_ready(&self) {
        self.ready.wait();
    }

    /// Blocks until the sender accepts `playable`.
    pub fn play(&self, playable: Box<dyn Playable>) -> Result<(), ProtocolError> {
        self.queue.play(playable)
    }

    /// Fires the close signal once; subsequent calls are noops.
    pub fn disconnect(&self) {
        self.close.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_is_idempotent() {
        let client = Client::new("u".into(), "g".into(), "s".into());
        client.disconnect();
        client.disconnect();
        assert!(client.close.is_fired());
    }

    #[test]
    fn run_is_idempotent() {
        let client = Client::new("u".into(), "g".into(), "s".into());
        client.run();
        client.run();
        assert!(client.server_info_rx.lock().is_none());
        client.disconnect();
    }

    #[test]
    fn set_speaking_without_connection_fails() {
        let client = Client::new("u".into(), "g".into(), "s".into());
        assert!(client.set_speaking(true).is_err());
    }
}
