//! The websocket-write mutex: every outbound control-plane message —
//! IDENTIFY, SELECT PROTOCOL, heartbeat, speaking — goes through this one
//! type, serialized by a single mutex held only for the duration of one
//! write, so the invariant can't be bypassed by a new call site.

use std::net::TcpStream;

use native_tls::TlsStream;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tungstenite::protocol::{frame::coding::CloseCode, frame::CloseFrame, WebSocket};
use tungstenite::Message;

use crate::error::ProtocolError;
use crate::payloads::{Heartbeat, Identify, IdentifyInfo, SelectProtocol, Speaking};

pub type VoiceSocket = WebSocket<TlsStream<TcpStream>>;

#[derive(Clone)]
pub struct WsWriter {
    inner: Arc<Mutex<VoiceSocket>>,
}

impl WsWriter {
    pub fn new(socket: VoiceSocket) -> Self {
        Self { inner: Arc::new(Mutex::new(socket)) }
    }

    fn send_json<T: Serialize>(&self, value: &T) -> Result<(), ProtocolError> {
        let mut guard = self.inner.lock();
        guard.write_message(Message::text(serde_json::to_string(value)?))?;
        Ok(())
    }

    pub fn send_identify(&self, info: IdentifyInfo) -> Result<(), ProtocolError> {
        self.send_json(&Identify::new(info))
    }

    pub fn send_select_protocol(&self, address: String, port: u16) -> Result<(), ProtocolError> {
        self.send_json(&SelectProtocol::from_addr(address, port))
    }

    pub fn send_heartbeat(&self) -> Result<(), ProtocolError> {
        self.send_json(&Heartbeat::now())
    }

    pub fn send_speaking(&self, speaking: bool) -> Result<(), ProtocolError> {
        self.send_json(&Speaking::new(speaking))
    }

    /// Grants exclusive, direct access to the underlying socket for reads
    /// (the inbound loop is the sole reader, so no contention with writers
    /// beyond the shared mutex).
    pub fn with_socket<R>(&self, f: impl FnOnce(&mut VoiceSocket) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn close(&self, code: u16) -> Result<(), ProtocolError> {
        let mut guard = self.inner.lock();
        guard.close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: std::borrow::Cow::Owned("closing connection".to_string()),
        }))?;
        Ok(())
    }
}
