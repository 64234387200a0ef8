//! Wire types for the websocket control plane.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::ENCRYPTION_MODE;

pub struct Opcode;

impl Opcode {
    pub const IDENTIFY: u8 = 0;
    pub const SELECT_PROTOCOL: u8 = 1;
    pub const READY: u8 = 2;
    pub const HEARTBEAT: u8 = 3;
    pub const SESSION_DESCRIPTION: u8 = 4;
    pub const SPEAKING: u8 = 5;
    pub const HEARTBEAT_ACK: u8 = 6;
    pub const HELLO: u8 = 8;
}

// --- outbound ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyInfo {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub op: u8,
    pub d: IdentifyInfo,
}

impl Identify {
    pub fn new(info: IdentifyInfo) -> Self {
        Self { op: Opcode::IDENTIFY, d: info }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolInfo {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolWrapper {
    pub protocol: String,
    pub data: SelectProtocolInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub op: u8,
    pub d: SelectProtocolWrapper,
}

impl SelectProtocol {
    pub fn from_addr(address: String, port: u16) -> Self {
        Self {
            op: Opcode::SELECT_PROTOCOL,
            d: SelectProtocolWrapper {
                protocol: "udp".to_string(),
                data: SelectProtocolInfo { address, port, mode: ENCRYPTION_MODE.to_string() },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub op: u8,
    pub d: u64,
}

impl Heartbeat {
    /// A monotonically progressing nonce; unix seconds is acceptable.
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch");
        Self { op: Opcode::HEARTBEAT, d: now.as_secs() }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct SpeakingInfo {
    pub speaking: bool,
    pub delay: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaking {
    pub op: u8,
    pub d: SpeakingInfo,
}

impl Speaking {
    pub fn new(speaking: bool) -> Self {
        Self { op: Opcode::SPEAKING, d: SpeakingInfo { speaking, delay: 0 } }
    }
}

// --- inbound ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RawReceivedPayload<'a> {
    pub op: u8,
    #[serde(default)]
    pub s: Option<i64>,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(borrow)]
    pub d: &'a RawValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_protocol_fixes_mode() {
        let msg = SelectProtocol::from_addr("1.2.3.4".to_string(), 1234);
        assert_eq!(msg.op, Opcode::SELECT_PROTOCOL);
        assert_eq!(msg.d.protocol, "udp");
        assert_eq!(msg.d.data.mode, "xsalsa20_poly1305");
        assert_eq!(msg.d.data.address, "1.2.3.4");
        assert_eq!(msg.d.data.port, 1234);
    }

    #[test]
    fn ready_deserializes_minimal() {
        let raw = r#"{"ssrc":7,"ip":"udp.test","port":50000,"modes":["xsalsa20_poly1305"]}"#;
        let ready: Ready = serde_json::from_str(raw).unwrap();
        assert_eq!(ready.ssrc, 7);
        assert_eq!(ready.ip, "udp.test");
        assert_eq!(ready.port, 50000);
    }

    #[test]
    fn session_description_parses_secret_key() {
        let key = [1u8; 32];
        let raw = serde_json::json!({ "mode": "xsalsa20_poly1305", "secret_key": key });
        let parsed: SessionDescription = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.secret_key, key);
    }
}
