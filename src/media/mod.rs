pub mod command;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use thiserror::Error;

pub use self::command::{ CommandMicrophone, CommandPlayer };

pub const DEFAULT_RECORDING_MIME: &str = "audio/webm";
pub const DEFAULT_REPLY_MIME: &str = "audio/mpeg";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Capture(String),
    #[error("{0}")]
    Playback(String),
    #[error("{0}")]
    Decode(String),
}

/// A complete piece of audio together with its MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Bytes,
    pub mime: String,
}

impl AudioClip {
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), mime: mime.into() }
    }

    /// Joins recorder chunks in arrival order into one clip.
    pub fn from_chunks(chunks: &[Bytes], mime: &str) -> Self {
        let total = chunks.iter().map(Bytes::len).sum();
        let mut joined = Vec::with_capacity(total);
        for chunk in chunks {
            joined.extend_from_slice(chunk);
        }
        Self::new(joined, mime)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds a playable clip from the base64 payload of a voice reply.
pub fn decode_reply_audio(data: &str, content_type: Option<&str>) -> Result<AudioClip, MediaError> {
    let mime = match content_type {
        Some(ct) if !ct.trim().is_empty() => ct.trim(),
        _ => DEFAULT_REPLY_MIME,
    };
    let bytes = BASE64.decode(data.trim()).map_err(|e| MediaError::Decode(e.to_string()))?;
    Ok(AudioClip::new(bytes, mime))
}

/// Grants access to a capture device. Acquiring may fail when the device is
/// missing or access is denied.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioCapture>, MediaError>;
}

/// A live capture holding the device until released.
#[async_trait]
pub trait AudioCapture: Send {
    fn mime_type(&self) -> &str;

    /// Ends capture and hands back every chunk not delivered yet.
    async fn stop(&mut self) -> Result<Vec<Bytes>, MediaError>;

    /// Gives the device back. Safe to call more than once.
    fn release(&mut self);
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, clip: AudioClip) -> Result<(), MediaError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
    use std::sync::{ Arc, Mutex };

    /// Observable state shared between a test and the captures it hands out.
    #[derive(Clone, Default)]
    pub struct DeviceMonitor {
        pub released: Arc<AtomicBool>,
        pub release_calls: Arc<AtomicUsize>,
    }

    impl DeviceMonitor {
        pub fn is_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    pub struct FakeCapture {
        pub device: DeviceMonitor,
        pub tail: Vec<Bytes>,
        pub fail_stop: bool,
    }

    #[async_trait]
    impl AudioCapture for FakeCapture {
        fn mime_type(&self) -> &str {
            DEFAULT_RECORDING_MIME
        }

        async fn stop(&mut self) -> Result<Vec<Bytes>, MediaError> {
            if self.fail_stop {
                return Err(MediaError::Capture("recorder crashed".into()));
            }
            Ok(std::mem::take(&mut self.tail))
        }

        fn release(&mut self) {
            self.device.released.store(true, Ordering::SeqCst);
            self.device.release_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn capture(tail: &[&[u8]]) -> (Box<dyn AudioCapture>, DeviceMonitor) {
        let device = DeviceMonitor::default();
        let capture = FakeCapture {
            device: device.clone(),
            tail: tail.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            fail_stop: false,
        };
        (Box::new(capture), device)
    }

    #[derive(Default)]
    pub struct RecordingPlayer {
        pub played: Mutex<Vec<AudioClip>>,
    }

    #[async_trait]
    impl AudioPlayer for RecordingPlayer {
        async fn play(&self, clip: AudioClip) -> Result<(), MediaError> {
            self.played.lock().unwrap().push(clip);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_join_in_order() {
        let chunks = vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")];
        let clip = AudioClip::from_chunks(&chunks, "audio/webm");
        assert_eq!(&clip.bytes[..], b"abcd");
        assert_eq!(clip.mime, "audio/webm");
    }

    #[test]
    fn reply_audio_defaults_to_mpeg() {
        let clip = decode_reply_audio("aGVsbG8=", None).unwrap();
        assert_eq!(&clip.bytes[..], b"hello");
        assert_eq!(clip.mime, DEFAULT_REPLY_MIME);

        let clip = decode_reply_audio("aGVsbG8=", Some("audio/wav")).unwrap();
        assert_eq!(clip.mime, "audio/wav");
    }

    #[test]
    fn reply_audio_rejects_bad_base64() {
        assert!(matches!(decode_reply_audio("***", None), Err(MediaError::Decode(_))));
    }
}
