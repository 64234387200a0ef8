//! UDP Transport: dial, IP-discovery handshake, and the drain-only reader.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread;

use crate::constants::DISCOVERY_PACKET_LEN;
use crate::error::ProtocolError;
use crate::playable::PlayableQueue;
use crate::rtp::RtpSender;
use crate::state::{OneShot, SecretKeyCell};
use crate::ws_write::WsWriter;

/// Result of the IP-discovery handshake: the external address and port the
/// server observed for this client.
pub struct Discovery {
    pub ip: String,
    pub port: u16,
}

fn dial(host: &str, port: u16) -> Result<UdpSocket, ProtocolError> {
    let addr: SocketAddr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| crate::error::custom_error("could not resolve UDP endpoint"))?;
    let socket = UdpSocket::bind(match addr {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    })?;
    socket.connect(addr)?;
    Ok(socket)
}

/// Performs the 70-byte IP-discovery request/response. Aborts (without
/// retry) when the reply is shorter than 70 bytes.
fn discover(socket: &UdpSocket, ssrc: u32) -> Result<Discovery, ProtocolError> {
    let mut request = [0u8; DISCOVERY_PACKET_LEN];
    request[..4].copy_from_slice(&ssrc.to_be_bytes());
    socket.send(&request)?;

    let mut reply = [0u8; DISCOVERY_PACKET_LEN];
    let len = socket.recv(&mut reply)?;
    if len < DISCOVERY_PACKET_LEN {
        return Err(ProtocolError::ShortDiscoveryReply(len));
    }

    let ip_end = reply[4..20]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| crate::error::custom_error("could not find end of discovered IP"))?;
    let ip = std::str::from_utf8(&reply[4..4 + ip_end])
        .map_err(|_| crate::error::custom_error("discovered IP was not valid UTF-8"))?
        .to_string();
    let port = u16::from_le_bytes([reply[68], reply[69]]);

    Ok(Discovery { ip, port })
}

/// Drain-only reader: reads into a discarded buffer, exits on read error.
/// Inbound voice is never decoded or decrypted; this client only sends.
fn run_drain_reader(socket: UdpSocket) {
    let mut scratch = [0u8; 1024];
    loop {
        match socket.recv(&mut scratch[..]) {
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "UDP drain reader exiting");
                return;
            }
        }
    }
}

/// Bring-up: dials UDP, performs discovery, sends SELECT PROTOCOL, and
/// spawns the RTP sender and the drain reader. Invariant violations (a
/// second UDP socket, a short discovery reply) log and abort without
/// retry, leaving the session in a degraded state until disconnect or a
/// new server-info update redials.
#[allow(clippy::too_many_arguments)]
pub fn bring_up(
    ws: WsWriter,
    host: String,
    port: u16,
    ssrc: u32,
    secret_key: Arc<SecretKeyCell>,
    secret_key_ready: Arc<OneShot>,
    queue: Arc<PlayableQueue>,
    close: Arc<OneShot>,
    child_close: Arc<OneShot>,
    ready: Arc<OneShot>,
) {
    let socket = match dial(&host, port) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, host, port, "failed to dial UDP endpoint");
            return;
        }
    };

    let discovery = match discover(&socket, ssrc) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "UDP IP-discovery failed, aborting bring-up");
            return;
        }
    };

    tracing::info!(ip = %discovery.ip, port = discovery.port, "UDP discovery complete");

    if let Err(e) = ws.send_select_protocol(discovery.ip, discovery.port) {
        tracing::error!(error = %e, "failed to send SELECT PROTOCOL");
        return;
    }

    let reader_socket = match socket.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to clone UDP socket for drain reader");
            return;
        }
    };
    thread::spawn(move || run_drain_reader(reader_socket));

    let sender = RtpSender::new(
        socket,
        ssrc,
        secret_key,
        secret_key_ready,
        ws,
        queue,
        close,
        child_close,
        ready,
    );
    thread::spawn(move || {
        if let Err(e) = sender.run() {
            tracing::error!(error = %e, "RTP sender terminated");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;

    #[test]
    fn discover_parses_ip_and_port() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server_addr).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; DISCOVERY_PACKET_LEN];
            let (_len, from) = server.recv_from(&mut buf).unwrap();
            let mut reply = [0u8; DISCOVERY_PACKET_LEN];
            reply[4..12].copy_from_slice(b"1.2.3.4\0");
            reply[68..70].copy_from_slice(&1234u16.to_le_bytes());
            server.send_to(&reply, from).unwrap();
        });

        let discovery = discover(&client, 7).unwrap();
        assert_eq!(discovery.ip, "1.2.3.4");
        assert_eq!(discovery.port, 1234);
        handle.join().unwrap();
    }

    #[test]
    fn discover_aborts_on_short_reply() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server_addr).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; DISCOVERY_PACKET_LEN];
            let (_len, from) = server.recv_from(&mut buf).unwrap();
            server.send_to(&[0u8; 40], from).unwrap();
        });

        let result = discover(&client, 7);
        assert!(matches!(result, Err(ProtocolError::ShortDiscoveryReply(40))));
        handle.join().unwrap();
    }
}
