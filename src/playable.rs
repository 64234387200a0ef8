//! Playable Source and Playable Queue.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::constants::SAMPLES_PER_FRAME;
use crate::error::ProtocolError;
use crate::opus::OpusEncoder;

/// A lazy, finite sequence of already-encoded Opus packets.
///
/// `output` returns the same stream on repeated calls until `close`; after
/// close it fails with `ProtocolError::Done`. Completion is signalled by the
/// output stream disconnecting (the producer side is dropped).
pub trait Playable: Send + Sync {
    fn output(&self) -> Result<Receiver<Vec<u8>>, ProtocolError>;
    fn close(&self);
}

/// Single-producer, single-consumer rendezvous channel shared by every
/// concrete `Playable`. The channel is unbuffered: a producer's send blocks
/// until the sender actually reads a frame, giving natural backpressure.
struct BasicPlayable {
    receiver: Receiver<Vec<u8>>,
    closed: AtomicBool,
}

impl BasicPlayable {
    fn new() -> (Arc<Self>, Sender<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Arc::new(Self { receiver: rx, closed: AtomicBool::new(false) }), tx)
    }

    fn output(&self) -> Result<Receiver<Vec<u8>>, ProtocolError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ProtocolError::Done)
        } else {
            Ok(self.receiver.clone())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Drives an FFmpeg-compatible subprocess, reads interleaved little-endian
/// 16-bit PCM from its stdout, and encodes each 20ms frame to Opus.
///
/// This is the sole concrete `Playable` this crate ships.
pub struct AvconvSource {
    inner: Arc<BasicPlayable>,
}

impl AvconvSource {
    pub fn new(path: &str) -> Self {
        let (inner, tx) = BasicPlayable::new();
        let worker = Arc::clone(&inner);
        let path = path.to_string();
        thread::spawn(move || run_decoder(&path, &worker, tx));
        Self { inner }
    }
}

impl Playable for AvconvSource {
    fn output(&self) -> Result<Receiver<Vec<u8>>, ProtocolError> {
        self.inner.output()
    }

    fn close(&self) {
        self.inner.close();
    }
}

fn spawn_ffmpeg(path: &str) -> std::io::Result<Child> {
    Command::new("ffmpeg")
        .arg("-i")
        .arg(path)
        .args(&["-f", "s16le", "-ar", "48000", "-ac", "2", "-loglevel", "warning", "pipe:1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

fn run_decoder(path: &str, state: &Arc<BasicPlayable>, tx: Sender<Vec<u8>>) {
    let mut child = match spawn_ffmpeg(path) {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, path, "failed to spawn ffmpeg decoder");
            state.close();
            return;
        }
    };

    let mut stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            tracing::error!(path, "ffmpeg decoder has no stdout pipe");
            state.close();
            let _ = child.kill();
            let _ = child.wait();
            return;
        }
    };

    let mut encoder = match OpusEncoder::new() {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct opus encoder");
            state.close();
            let _ = child.kill();
            let _ = child.wait();
            return;
        }
    };

    let mut pcm = [0i16; SAMPLES_PER_FRAME as usize];
    let mut bytes = [0u8; (SAMPLES_PER_FRAME as usize) * 2];

    loop {
        if state.is_closed() {
            break;
        }

        match stdout.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!(error = %e, "ffmpeg decoder stdout read failed");
                break;
            }
        }

        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            pcm[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
        }

        let frame = match encoder.encode(&pcm) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "opus encode failed, ending playable");
                break;
            }
        };

        if tx.send(frame).is_err() {
            // consumer gone; no point continuing to decode.
            break;
        }
    }

    state.close();
    drop(tx);
    let _ = child.kill();
    let _ = child.wait();
}

/// Single-slot rendezvous from the control API into the sender. `play`
/// blocks until the sender accepts the playable.
pub struct PlayableQueue {
    tx: Sender<Box<dyn Playable>>,
    rx: Receiver<Box<dyn Playable>>,
}

impl PlayableQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self { tx, rx }
    }

    /// Hands `playable` to the sender; blocks until it is accepted.
    pub fn play(&self, playable: Box<dyn Playable>) -> Result<(), ProtocolError> {
        self.tx.send(playable).map_err(|_| ProtocolError::ChannelClosed)
    }

    pub fn receiver(&self) -> Receiver<Box<dyn Playable>> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct StubPlayable {
        inner: Arc<BasicPlayable>,
        _tx: Sender<Vec<u8>>,
    }

    impl StubPlayable {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            let (inner, tx) = BasicPlayable::new();
            let sender = tx.clone();
            thread::spawn(move || {
                for frame in frames {
                    if sender.send(frame).is_err() {
                        break;
                    }
                }
            });
            Self { inner, _tx: tx }
        }
    }

    impl Playable for StubPlayable {
        fn output(&self) -> Result<Receiver<Vec<u8>>, ProtocolError> {
            self.inner.output()
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    #[test]
    fn stub_playable_yields_exactly_k_frames() {
        let frames = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
        let playable = StubPlayable::new(frames.clone());
        let rx = playable.output().unwrap();
        let mut received = Vec::new();
        for _ in 0..frames.len() {
            received.push(rx.recv().unwrap());
        }
        assert_eq!(received, frames);
    }

    #[test]
    fn output_fails_with_done_after_close() {
        let playable = StubPlayable::new(vec![]);
        playable.close();
        match playable.output() {
            Err(ProtocolError::Done) => {}
            other => panic!("expected Done, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn playable_queue_hands_off_between_threads() {
        let queue = Arc::new(PlayableQueue::new());
        let rx = queue.receiver();
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            producer.play(Box::new(StubPlayable::new(vec![vec![42]]))).unwrap();
        });
        let playable = rx.recv().expect("playable queue closed unexpectedly");
        let frame = playable.output().unwrap().recv().unwrap();
        assert_eq!(frame, vec![42]);
        handle.join().unwrap();
    }
}
