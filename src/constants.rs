//! Fixed protocol constants.
//!
//! None of these are meant to be runtime-configurable: the Discord voice
//! gateway pins the sample rate, channel count and frame size, and the
//! pacing cadence follows directly from them.

/// Interleaved stereo.
pub const CHANNELS: u32 = 2;
/// 48 kHz, fixed by the gateway.
pub const FRAME_RATE: u32 = 48_000;
/// Samples per channel per 20ms Opus frame.
pub const FRAME_SIZE: u32 = 960;
/// Samples per frame across both channels (`FRAME_SIZE * CHANNELS`).
pub const SAMPLES_PER_FRAME: u32 = FRAME_SIZE * CHANNELS;
/// Upper bound on an Opus packet's size for this frame configuration.
pub const MAX_BYTES: usize = (FRAME_SIZE as usize * 2) * 2;
/// RTP send cadence: `FRAME_SIZE / (FRAME_RATE / 1000)` ms.
pub const TICK_MILLIS: u64 = (FRAME_SIZE as u64) / (FRAME_RATE as u64 / 1000);
/// Gateway version pinned in the websocket URL query string.
pub const GATEWAY_VERSION: u8 = 4;
/// The only encryption mode this client negotiates.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";
/// secretbox authentication tag overhead added to each ciphertext.
pub const SECRETBOX_OVERHEAD: usize = 16;
/// Size in bytes of the RTP header prefix on every packet.
pub const RTP_HEADER_LEN: usize = 12;
/// Size of the IP-discovery request/response datagram.
pub const DISCOVERY_PACKET_LEN: usize = 70;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizing_matches_spec() {
        assert_eq!(SAMPLES_PER_FRAME, 1920);
        assert_eq!(MAX_BYTES, 3840);
        assert_eq!(TICK_MILLIS, 20);
    }
}
