use async_trait::async_trait;
use bytes::Bytes;
use log::{ debug, info, warn };
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{ Child, Command };
use tokio::task::JoinHandle;
use uuid::Uuid;
use super::{ AudioCapture, AudioClip, AudioPlayer, MediaError, Microphone };

const READ_BUFFER_SIZE: usize = 8 * 1024;

fn split_command(command_line: &str) -> Result<(String, Vec<String>), MediaError> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| MediaError::Unavailable("empty audio command".to_string()))?;
    Ok((program, parts.collect()))
}

/// Captures audio by running an external recorder that writes the encoded
/// stream to stdout (for example `arecord -q -f cd -t wav -`).
#[derive(Debug, Clone)]
pub struct CommandMicrophone {
    command_line: String,
    mime: String,
}

impl CommandMicrophone {
    pub fn new(command_line: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            mime: mime.into(),
        }
    }
}

#[async_trait]
impl Microphone for CommandMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioCapture>, MediaError> {
        let (program, args) = split_command(&self.command_line)?;
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Unavailable(format!("{}: {}", program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Unavailable("recorder has no stdout".to_string()))?;

        let reader = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => chunks.push(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        warn!("Recorder stream error: {}", e);
                        break;
                    }
                }
            }
            chunks
        });

        info!("Recording started with '{}'", self.command_line);
        Ok(Box::new(CommandCapture {
            child: Some(child),
            reader: Some(reader),
            mime: self.mime.clone(),
        }))
    }
}

struct CommandCapture {
    child: Option<Child>,
    reader: Option<JoinHandle<Vec<Bytes>>>,
    mime: String,
}

#[async_trait]
impl AudioCapture for CommandCapture {
    fn mime_type(&self) -> &str {
        &self.mime
    }

    async fn stop(&mut self) -> Result<Vec<Bytes>, MediaError> {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                debug!("Recorder already exited: {}", e);
            }
        }
        self.child = None;

        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => return Ok(Vec::new()),
        };
        reader.await.map_err(|e| MediaError::Capture(e.to_string()))
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Recorder already exited: {}", e);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for CommandCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Plays clips by handing a temporary file to an external player.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    command_line: String,
}

impl CommandPlayer {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self { command_line: command_line.into() }
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, clip: AudioClip) -> Result<(), MediaError> {
        let (program, args) = split_command(&self.command_line)?;
        let path = std::env
            ::temp_dir()
            .join(format!("hotel-chat-{}.{}", Uuid::new_v4(), extension_for(&clip.mime)));
        tokio::fs
            ::write(&path, &clip.bytes).await
            .map_err(|e| MediaError::Playback(e.to_string()))?;

        debug!("Playing {} bytes of {} from {}", clip.bytes.len(), clip.mime, path.display());
        let status = Command::new(&program)
            .args(&args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status().await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::Playback(format!("{} exited with {}", program, status))),
            Err(e) => Err(MediaError::Playback(format!("{}: {}", program, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_splits_program_and_args() {
        let (program, args) = split_command("arecord -q -f cd -").unwrap();
        assert_eq!(program, "arecord");
        assert_eq!(args, vec!["-q", "-f", "cd", "-"]);
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn extension_follows_mime() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/webm;codecs=opus"), "webm");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }

    #[tokio::test]
    async fn missing_recorder_is_reported_as_unavailable() {
        let mic = CommandMicrophone::new("hotel-chat-no-such-recorder", "audio/wav");
        let result = mic.open().await;
        assert!(matches!(result, Err(MediaError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recorder_output_is_collected_on_stop() {
        let mic = CommandMicrophone::new("echo hello", "audio/wav");
        let mut capture = mic.open().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let chunks = capture.stop().await.unwrap();
        let clip = AudioClip::from_chunks(&chunks, capture.mime_type());
        assert_eq!(&clip.bytes[..], b"hello\n");
        capture.release();
    }
}
