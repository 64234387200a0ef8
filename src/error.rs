use std::net::{AddrParseError, TcpStream};

#[derive(Debug)]
pub enum ProtocolError {
    Serde(serde_json::error::Error),
    Opus(audiopus::error::Error),
    Nacl(xsalsa20poly1305::aead::Error),
    WebSocket(tungstenite::error::Error),
    Io(std::io::Error),
    Closed(u16),
    /// A sibling channel/signal was disconnected (its other end dropped).
    ChannelClosed,
    /// The IP-discovery reply was shorter than the fixed 70-byte packet.
    ShortDiscoveryReply(usize),
    /// The playable's output stream was requested after it was closed.
    Done,
}

pub(crate) fn custom_error(text: &str) -> ProtocolError {
    let inner = std::io::Error::new(std::io::ErrorKind::Other, text);
    ProtocolError::Io(inner)
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Serde(ref e) => e.fmt(f),
            ProtocolError::WebSocket(ref e) => e.fmt(f),
            ProtocolError::Opus(ref e) => e.fmt(f),
            ProtocolError::Nacl(ref e) => write!(f, "encryption failure: {:?}", e),
            ProtocolError::Io(ref e) => e.fmt(f),
            ProtocolError::Closed(code) => write!(f, "websocket connection closed (code: {})", code),
            ProtocolError::ChannelClosed => write!(f, "internal channel disconnected"),
            ProtocolError::ShortDiscoveryReply(len) => {
                write!(f, "IP discovery reply too short: {} bytes", len)
            }
            ProtocolError::Done => write!(f, "playable has been closed"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            ProtocolError::Serde(ref e) => Some(e),
            ProtocolError::WebSocket(ref e) => Some(e),
            ProtocolError::Opus(ref e) => Some(e),
            ProtocolError::Io(ref e) => Some(e),
            ProtocolError::Nacl(_) => None,
            ProtocolError::Closed(_) => None,
            ProtocolError::ChannelClosed => None,
            ProtocolError::ShortDiscoveryReply(_) => None,
            ProtocolError::Done => None,
        }
    }
}

impl From<serde_json::error::Error> for ProtocolError {
    fn from(err: serde_json::error::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<tungstenite::error::Error> for ProtocolError {
    fn from(err: tungstenite::error::Error) -> Self {
        Self::WebSocket(err)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<AddrParseError> for ProtocolError {
    fn from(_: AddrParseError) -> Self {
        custom_error("invalid IP address")
    }
}

impl From<native_tls::Error> for ProtocolError {
    fn from(err: native_tls::Error) -> Self {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, err.to_string());
        Self::Io(inner)
    }
}

impl From<native_tls::HandshakeError<TcpStream>> for ProtocolError {
    fn from(err: native_tls::HandshakeError<TcpStream>) -> Self {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, err.to_string());
        Self::Io(inner)
    }
}

impl From<audiopus::error::Error> for ProtocolError {
    fn from(err: audiopus::error::Error) -> Self {
        Self::Opus(err)
    }
}

impl From<xsalsa20poly1305::aead::Error> for ProtocolError {
    fn from(err: xsalsa20poly1305::aead::Error) -> Self {
        Self::Nacl(err)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for ProtocolError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl From<crossbeam_channel::RecvError> for ProtocolError {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        Self::ChannelClosed
    }
}

/// True when a websocket close code allows a fresh redial rather than a
/// terminal failure (non-resumable: normal closure, channel deleted, server
/// crash). Mirrors the teacher's `code_can_be_handled`.
pub fn code_can_be_handled(code: u16) -> bool {
    code != 1000 && code != 4014 && code != 4015
}
