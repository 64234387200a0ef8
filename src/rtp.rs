//! RTP framing and the RTP Sender's paced send loop.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

use xsalsa20poly1305::aead::generic_array::GenericArray;
use xsalsa20poly1305::aead::{AeadInPlace, Buffer, NewAead};
use xsalsa20poly1305::XSalsa20Poly1305;

use crate::constants::{RTP_HEADER_LEN, SAMPLES_PER_FRAME, TICK_MILLIS};
use crate::error::ProtocolError;
use crate::payloads::Speaking;
use crate::playable::{Playable, PlayableQueue};
use crate::state::{OneShot, SecretKeyCell};
use crate::ws_write::WsWriter;

/// Builds the 12-byte RTP header for one packet.
pub fn build_header(sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    header[0] = 0x80;
    header[1] = 0x78;
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// Builds the 24-byte secretbox nonce: the RTP header, zero-padded.
pub fn build_nonce(header: &[u8; RTP_HEADER_LEN]) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..RTP_HEADER_LEN].copy_from_slice(header);
    nonce
}

/// Advances `sequence`, wrapping to 0 at `0xFFFF`.
pub fn next_sequence(sequence: u16) -> u16 {
    if sequence == 0xFFFF {
        0
    } else {
        sequence + 1
    }
}

/// Advances `timestamp`, resetting to 0 if the next value would reach or
/// exceed `0xFFFFFFFF`.
pub fn next_timestamp(timestamp: u32) -> u32 {
    if timestamp as u64 + SAMPLES_PER_FRAME as u64 >= 0xFFFF_FFFFu64 {
        0
    } else {
        timestamp + SAMPLES_PER_FRAME
    }
}

/// A heapless in-place AEAD buffer over a fixed-size stack array, mirroring
/// the teacher's `InPlaceBuffer` so the cipher can operate without a heap
/// allocation per packet.
struct InPlaceBuffer<'a> {
    slice: &'a mut [u8],
    length: usize,
}

impl<'a> InPlaceBuffer<'a> {
    fn new(slice: &'a mut [u8], length: usize) -> Self {
        Self { slice, length }
    }

    fn len(&self) -> usize {
        self.length
    }
}

impl<'a> AsRef<[u8]> for InPlaceBuffer<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.slice[..self.length]
    }
}

impl<'a> AsMut<[u8]> for InPlaceBuffer<'a> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.slice[..self.length]
    }
}

impl<'a> Buffer for InPlaceBuffer<'a> {
    fn extend_from_slice(&mut self, other: &[u8]) -> Result<(), xsalsa20poly1305::aead::Error> {
        if self.length + other.len() > self.slice.len() {
            return Err(xsalsa20poly1305::aead::Error);
        }
        self.slice[self.length..self.length + other.len()].copy_from_slice(other);
        self.length += other.len();
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        if len < self.length {
            self.length = len;
        }
    }

    fn len(&self) -> usize {
        self.length
    }

    fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Maximum packet this client ever sends: 12-byte header + an Opus frame
/// (bounded by `MAX_BYTES`) + the 16-byte secretbox tag.
const MAX_PACKET_LEN: usize = RTP_HEADER_LEN + crate::constants::MAX_BYTES + 16;

/// Seals one RTP packet in place: `buffer[..RTP_HEADER_LEN]` must already
/// hold the header; `buffer[RTP_HEADER_LEN..RTP_HEADER_LEN+plaintext_len]`
/// must hold the Opus plaintext. Returns the total packet length.
fn seal_packet(
    cipher: &XSalsa20Poly1305,
    buffer: &mut [u8; MAX_PACKET_LEN],
    plaintext_len: usize,
) -> Result<usize, ProtocolError> {
    let mut header = [0u8; RTP_HEADER_LEN];
    header.copy_from_slice(&buffer[..RTP_HEADER_LEN]);
    let nonce = build_nonce(&header);

    let mut payload = InPlaceBuffer::new(&mut buffer[RTP_HEADER_LEN..], plaintext_len);
    cipher.encrypt_in_place(GenericArray::from_slice(&nonce), b"", &mut payload)?;
    let sealed_len = payload.len();
    Ok(RTP_HEADER_LEN + sealed_len)
}

/// Pre-loop warm-up: speaking true/false/true with 1s pauses, matching the
/// Discord voice protocol's de-facto handshake.
fn warm_up(ws: &WsWriter, close: &OneShot, child_close: &OneShot) -> Result<(), ProtocolError> {
    ws.send_speaking(true)?;
    if wait_or_closed(Duration::from_secs(1), close, child_close) {
        return Err(ProtocolError::Closed(1000));
    }
    ws.send_speaking(false)?;
    if wait_or_closed(Duration::from_secs(1), close, child_close) {
        return Err(ProtocolError::Closed(1000));
    }
    ws.send_speaking(true)?;
    Ok(())
}

fn wait_or_closed(duration: Duration, close: &OneShot, child_close: &OneShot) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if close.is_fired() || child_close.is_fired() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}

pub struct RtpSender {
    socket: UdpSocket,
    ssrc: u32,
    secret_key: Arc<SecretKeyCell>,
    /// Fired once SESSION DESCRIPTION has stored the real key; the sender
    /// waits on this before it ever builds a cipher, so it never encrypts
    /// with the zero key `SecretKeyCell` starts out holding.
    secret_key_ready: Arc<OneShot>,
    ws: WsWriter,
    queue: Arc<PlayableQueue>,
    /// Client-wide close signal, fired once by `Client::disconnect`.
    close: Arc<OneShot>,
    /// This websocket connection's own close signal: fired when its reader
    /// tears down (read error, or superseded by a redial), independent of
    /// the client-wide signal.
    child_close: Arc<OneShot>,
    ready: Arc<OneShot>,
}

impl RtpSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: UdpSocket,
        ssrc: u32,
        secret_key: Arc<SecretKeyCell>,
        secret_key_ready: Arc<OneShot>,
        ws: WsWriter,
        queue: Arc<PlayableQueue>,
        close: Arc<OneShot>,
        child_close: Arc<OneShot>,
        ready: Arc<OneShot>,
    ) -> Self {
        Self { socket, ssrc, secret_key, secret_key_ready, ws, queue, close, child_close, ready }
    }

    /// Runs the paced send loop until either close signal fires or a UDP
    /// write fails. The sole writer of audio packets and the sole mutator
    /// of sequence/timestamp.
    pub fn run(mut self) -> Result<(), ProtocolError> {
        warm_up(&self.ws, &self.close, &self.child_close)?;

        crossbeam_channel::select! {
            recv(self.secret_key_ready.wait_channel()) -> _ => {},
            recv(self.close.wait_channel()) -> _ => return Ok(()),
            recv(self.child_close.wait_channel()) -> _ => return Ok(()),
        }

        self.ready.fire();
        tracing::info!("ready to transmit voice data");

        let key = GenericArray::clone_from_slice(&self.secret_key.get());
        let cipher = XSalsa20Poly1305::new(&key);

        let mut sequence: u16 = 0;
        let mut timestamp: u32 = 0;
        let mut current: Option<(Box<dyn Playable>, crossbeam_channel::Receiver<Vec<u8>>)> = None;
        let ticker = crossbeam_channel::tick(Duration::from_millis(TICK_MILLIS));
        let queue_rx = self.queue.receiver();

        loop {
            if current.is_none() {
                crossbeam_channel::select! {
                    recv(queue_rx) -> playable => {
                        let playable = match playable {
                            Ok(p) => p,
                            Err(_) => return Err(ProtocolError::ChannelClosed),
                        };
                        match playable.output() {
                            Ok(stream) => current = Some((playable, stream)),
                            Err(e) => {
                                tracing::warn!(error = %e, "error opening playable output");
                            }
                        }
                        continue;
                    },
                    recv(self.close.wait_channel()) -> _ => return Ok(()),
                    recv(self.child_close.wait_channel()) -> _ => return Ok(()),
                }
            }

            let (_playable, stream) = current.as_ref().expect("checked above");
            let frame = match stream.recv() {
                Ok(frame) => frame,
                Err(_) => {
                    current = None;
                    continue;
                }
            };

            let mut buffer = [0u8; MAX_PACKET_LEN];
            let header = build_header(sequence, timestamp, self.ssrc);
            buffer[..RTP_HEADER_LEN].copy_from_slice(&header);
            buffer[RTP_HEADER_LEN..RTP_HEADER_LEN + frame.len()].copy_from_slice(&frame);
            let packet_len = seal_packet(&cipher, &mut buffer, frame.len())?;

            crossbeam_channel::select! {
                recv(ticker) -> _ => {},
                recv(self.close.wait_channel()) -> _ => return Ok(()),
                recv(self.child_close.wait_channel()) -> _ => return Ok(()),
            }

            self.socket.send(&buffer[..packet_len])?;

            sequence = next_sequence(sequence);
            timestamp = next_timestamp(timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_spec() {
        let header = build_header(0x1234, 0xDEADBEEF, 0xCAFEBABE);
        assert_eq!(header[0], 0x80);
        assert_eq!(header[1], 0x78);
        assert_eq!(&header[2..4], &0x1234u16.to_be_bytes());
        assert_eq!(&header[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&header[8..12], &0xCAFEBABEu32.to_be_bytes());
    }

    #[test]
    fn nonce_prefix_is_header_remainder_zero() {
        let header = build_header(1, 2, 3);
        let nonce = build_nonce(&header);
        assert_eq!(&nonce[..12], &header);
        assert_eq!(&nonce[12..], &[0u8; 12]);
    }

    #[test]
    fn sequence_wraps_at_0xffff() {
        assert_eq!(next_sequence(0xFFFF), 0);
        assert_eq!(next_sequence(5), 6);
    }

    #[test]
    fn timestamp_resets_near_u32_max() {
        assert_eq!(next_timestamp(0xFFFF_FFFF - 500), 0);
        assert_eq!(next_timestamp(0), SAMPLES_PER_FRAME);
    }

    #[test]
    fn sealed_packet_length_is_header_plus_overhead_plus_frame() {
        let key = GenericArray::clone_from_slice(&[9u8; 32]);
        let cipher = XSalsa20Poly1305::new(&key);
        let mut buffer = [0u8; MAX_PACKET_LEN];
        let header = build_header(0, 0, 42);
        buffer[..RTP_HEADER_LEN].copy_from_slice(&header);
        let plaintext = vec![1u8; 100];
        buffer[RTP_HEADER_LEN..RTP_HEADER_LEN + plaintext.len()].copy_from_slice(&plaintext);
        let total = seal_packet(&cipher, &mut buffer, plaintext.len()).unwrap();
        assert_eq!(total, RTP_HEADER_LEN + plaintext.len() + 16);
        assert_eq!(&buffer[..RTP_HEADER_LEN], &header);
    }
}
