//! Session Supervisor: owns the client-wide close signal's consumer loop,
//! accepts `ServerInfo` updates, and (re)dials the websocket control plane
//! on each one.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::control::{self, SessionHandles};
use crate::payloads::IdentifyInfo;
use crate::playable::PlayableQueue;
use crate::state::{OneShot, SecretKeyCell};
use crate::ws_write::WsWriter;

/// Pushed by the embedding host through a single-slot channel; consumed by
/// the supervisor to trigger a (re)dial.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub endpoint: String,
    pub token: String,
}

#[allow(clippy::too_many_arguments)]
pub fn start(
    user_id: String,
    guild_id: String,
    session_id: String,
    server_info_rx: Receiver<ServerInfo>,
    current_ws: Arc<Mutex<Option<WsWriter>>>,
    secret_key: Arc<SecretKeyCell>,
    queue: Arc<PlayableQueue>,
    close: Arc<OneShot>,
    ready: Arc<OneShot>,
) {
    thread::spawn(move || {
        supervise(
            user_id,
            guild_id,
            session_id,
            server_info_rx,
            current_ws,
            secret_key,
            queue,
            close,
            ready,
        )
    });
}

#[allow(clippy::too_many_arguments)]
fn supervise(
    user_id: String,
    guild_id: String,
    session_id: String,
    server_info_rx: Receiver<ServerInfo>,
    current_ws: Arc<Mutex<Option<WsWriter>>>,
    secret_key: Arc<SecretKeyCell>,
    queue: Arc<PlayableQueue>,
    close: Arc<OneShot>,
    ready: Arc<OneShot>,
) {
    loop {
        crossbeam_channel::select! {
            recv(server_info_rx) -> info => {
                let info = match info {
                    Ok(info) => info,
                    // The sender (the Client) was dropped; nothing left to supervise.
                    Err(_) => return,
                };
                redial(
                    info,
                    &user_id,
                    &guild_id,
                    &session_id,
                    &current_ws,
                    &secret_key,
                    &queue,
                    &close,
                    &ready,
                );
            },
            recv(close.wait_channel()) -> _ => {
                if let Some(ws) = current_ws.lock().take() {
                    let _ = ws.close(1000);
                }
                tracing::debug!("supervisor stopped by close signal");
                return;
            },
        }
    }
}

/// Closes any existing websocket (forcing its reader to tear down), then
/// dials the new endpoint and spawns a fresh control plane with its own
/// per-connection close signal.
#[allow(clippy::too_many_arguments)]
fn redial(
    info: ServerInfo,
    user_id: &str,
    guild_id: &str,
    session_id: &str,
    current_ws: &Arc<Mutex<Option<WsWriter>>>,
    secret_key: &Arc<SecretKeyCell>,
    queue: &Arc<PlayableQueue>,
    close: &Arc<OneShot>,
    ready: &Arc<OneShot>,
) {
    if let Some(ws) = current_ws.lock().take() {
        let _ = ws.close(1000);
    }

    let ws = match control::dial(&info.endpoint) {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!(error = %e, endpoint = %info.endpoint, "failed to dial voice gateway");
            return;
        }
    };

    *current_ws.lock() = Some(ws.clone());

    let identify = IdentifyInfo {
        server_id: guild_id.to_string(),
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
        token: info.token,
    };
    let handles = SessionHandles {
        secret_key: Arc::clone(secret_key),
        secret_key_ready: Arc::new(OneShot::new()),
        queue: Arc::clone(queue),
        close: Arc::clone(close),
        child_close: Arc::new(OneShot::new()),
        ready: Arc::clone(ready),
    };
    let child_close = Arc::clone(&handles.child_close);

    thread::spawn(move || {
        if let Err(e) = control::run(ws, identify, handles) {
            tracing::warn!(error = %e, "control plane terminated");
        }
        child_close.fire();
    });
}
