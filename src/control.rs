//! Websocket Control Plane: dial, IDENTIFY, inbound dispatch, and the
//! Heartbeater.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use native_tls::TlsConnector;
use tungstenite::error::Error as TungError;
use tungstenite::Message;

use crate::constants::GATEWAY_VERSION;
use crate::error::{custom_error, ProtocolError};
use crate::payloads::{Hello, IdentifyInfo, Opcode, RawReceivedPayload, Ready, SessionDescription};
use crate::playable::PlayableQueue;
use crate::state::{OneShot, SecretKeyCell};
use crate::udp;
use crate::ws_write::WsWriter;

/// Read timeout on the underlying TCP stream so the reader periodically
/// lets go of the ws-write mutex instead of parking inside `read_message`
/// for the life of the connection (mirrors the teacher's 5s socket timeout).
const READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Dials the voice gateway at `wss://<host>:443/?v=4`, trimming a trailing
/// `:80` from the endpoint as Discord's voice server info includes it.
pub fn dial(endpoint: &str) -> Result<WsWriter, ProtocolError> {
    let host = endpoint.trim_end_matches(":80");
    let connector = TlsConnector::new()?;
    let stream = TcpStream::connect((host, 443))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let tls_stream = connector.connect(host, stream)?;
    let url = format!("wss://{}:443/?v={}", host, GATEWAY_VERSION);
    tracing::debug!(%url, "dialing voice gateway");
    match tungstenite::client::client(url.as_str(), tls_stream) {
        Ok((ws, _response)) => Ok(WsWriter::new(ws)),
        Err(e) => Err(custom_error(&e.to_string())),
    }
}

pub struct SessionHandles {
    pub secret_key: Arc<SecretKeyCell>,
    /// Fired once SESSION DESCRIPTION has stored the secret key, so the
    /// sender never encrypts with the zero key it starts with.
    pub secret_key_ready: Arc<OneShot>,
    pub queue: Arc<PlayableQueue>,
    /// Client-wide close, fired once by `Client::disconnect`.
    pub close: Arc<OneShot>,
    /// This connection generation's own close, fired by the Supervisor on
    /// redial or when this `run` call returns.
    pub child_close: Arc<OneShot>,
    pub ready: Arc<OneShot>,
}

/// Sends IDENTIFY and runs the inbound dispatch loop until the socket
/// closes or a read fails. Parse errors on individual frames are logged
/// and the loop continues; a read failure terminates the loop.
pub fn run(ws: WsWriter, identify: IdentifyInfo, handles: SessionHandles) -> Result<(), ProtocolError> {
    ws.send_identify(identify)?;
    tracing::debug!("sent IDENTIFY");

    loop {
        let message = ws.with_socket(|socket| socket.read_message());
        let message = match message {
            Ok(m) => m,
            Err(TungError::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(ProtocolError::from(e)),
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = dispatch(&ws, &text, &handles) {
                    tracing::warn!(error = %e, payload = %text, "failed to process gateway message");
                }
            }
            Message::Close(frame) => {
                let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                tracing::info!(code, "voice gateway closed the connection");
                return Err(ProtocolError::Closed(code));
            }
            _ => {}
        }
    }
}

fn dispatch(ws: &WsWriter, text: &str, handles: &SessionHandles) -> Result<(), ProtocolError> {
    let payload: RawReceivedPayload = serde_json::from_str(text)?;
    match payload.op {
        Opcode::HELLO => {
            let hello: Hello = serde_json::from_str(payload.d.get())?;
            let interval_ms = hello.heartbeat_interval.max(1.0) as u64;
            tracing::debug!(interval_ms, "received HELLO, starting heartbeater");
            spawn_heartbeater(
                ws.clone(),
                interval_ms,
                Arc::clone(&handles.close),
                Arc::clone(&handles.child_close),
            );
        }
        Opcode::READY => {
            let ready: Ready = serde_json::from_str(payload.d.get())?;
            tracing::debug!(ssrc = ready.ssrc, ip = %ready.ip, port = ready.port, "received READY");
            let ws = ws.clone();
            let secret_key = Arc::clone(&handles.secret_key);
            let secret_key_ready = Arc::clone(&handles.secret_key_ready);
            let queue = Arc::clone(&handles.queue);
            let close = Arc::clone(&handles.close);
            let child_close = Arc::clone(&handles.child_close);
            let ready_signal = Arc::clone(&handles.ready);
            thread::spawn(move || {
                udp::bring_up(
                    ws,
                    ready.ip,
                    ready.port,
                    ready.ssrc,
                    secret_key,
                    secret_key_ready,
                    queue,
                    close,
                    child_close,
                    ready_signal,
                );
            });
        }
        Opcode::SESSION_DESCRIPTION => {
            let session: SessionDescription = serde_json::from_str(payload.d.get())?;
            tracing::debug!("received SESSION DESCRIPTION");
            handles.secret_key.set(session.secret_key);
            handles.secret_key_ready.fire();
        }
        Opcode::HEARTBEAT_ACK => {
            tracing::debug!("heartbeat acknowledged");
        }
        Opcode::HEARTBEAT => {
            // The gateway occasionally echoes this back; not a command to act on.
        }
        other => {
            tracing::debug!(op = other, "unhandled gateway opcode");
        }
    }
    Ok(())
}

/// Periodic task that writes op-3 heartbeats at the HELLO-advertised
/// interval under the ws-write mutex; terminates on ws-write error or when
/// either close signal fires.
fn spawn_heartbeater(ws: WsWriter, interval_ms: u64, close: Arc<OneShot>, child_close: Arc<OneShot>) {
    thread::spawn(move || {
        let ticker = crossbeam_channel::tick(Duration::from_millis(interval_ms));
        loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => {
                    if let Err(e) = ws.send_heartbeat() {
                        tracing::error!(error = %e, "heartbeat write failed, stopping heartbeater");
                        return;
                    }
                },
                recv(close.wait_channel()) -> _ => {
                    tracing::debug!("heartbeater stopped by close signal");
                    return;
                },
                recv(child_close.wait_channel()) -> _ => {
                    tracing::debug!("heartbeater stopped by connection teardown");
                    return;
                },
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Opcode;

    #[test]
    fn session_description_payload_parses_into_secret_key() {
        let key = [5u8; 32];
        let payload = serde_json::json!({
            "op": Opcode::SESSION_DESCRIPTION,
            "d": { "mode": "xsalsa20_poly1305", "secret_key": key },
        });
        let text = payload.to_string();
        let parsed: RawReceivedPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.op, Opcode::SESSION_DESCRIPTION);
        let session: SessionDescription = serde_json::from_str(parsed.d.get()).unwrap();
        let cell = SecretKeyCell::new();
        cell.set(session.secret_key);
        assert_eq!(cell.get(), key);
    }

    #[test]
    fn unhandled_opcode_parses_without_error() {
        let payload = serde_json::json!({ "op": 12, "d": {} });
        let text = payload.to_string();
        let parsed: RawReceivedPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.op, 12);
    }
}
