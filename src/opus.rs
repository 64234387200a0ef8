//! Opus Encoder Adapter. Stateless beyond the encoder instance: no
//! buffering, no resampling, one call in, one packet out.

use crate::constants::{FRAME_RATE, MAX_BYTES, SAMPLES_PER_FRAME};
use crate::error::ProtocolError;

pub struct OpusEncoder {
    inner: audiopus::coder::Encoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, ProtocolError> {
        let mut encoder = audiopus::coder::Encoder::new(
            audiopus::SampleRate::Hz48000,
            audiopus::Channels::Stereo,
            audiopus::Application::Audio,
        )?;
        encoder.set_bitrate(audiopus::Bitrate::BitsPerSecond(128 * 1024))?;
        encoder.enable_inband_fec()?;
        encoder.set_packet_loss_perc(15)?;
        encoder.set_bandwidth(audiopus::Bandwidth::Fullband)?;
        encoder.set_signal(audiopus::Signal::Auto)?;
        debug_assert_eq!(FRAME_RATE, 48_000);
        Ok(Self { inner: encoder })
    }

    /// Encodes exactly one 20ms PCM frame (`SAMPLES_PER_FRAME` interleaved
    /// i16 samples) into an Opus packet of at most `MAX_BYTES`.
    ///
    /// # Panics
    /// Panics if `pcm.len() != SAMPLES_PER_FRAME as usize`: the caller must
    /// hand over exactly one frame's worth of interleaved samples.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, ProtocolError> {
        assert_eq!(
            pcm.len(),
            SAMPLES_PER_FRAME as usize,
            "PCM frame must contain exactly {} interleaved samples",
            SAMPLES_PER_FRAME
        );
        let mut out = vec![0u8; MAX_BYTES];
        let size = self.inner.encode(pcm, &mut out)?;
        out.truncate(size);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn encode_rejects_wrong_frame_length() {
        let mut encoder = OpusEncoder::new().expect("opus encoder construction");
        let _ = encoder.encode(&[0i16; 10]);
    }
}
