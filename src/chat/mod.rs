//! State of one open conversation: its history, the text composer, the
//! voice recorder and reply playback.
//!
//! Every network or device operation is split into a `begin_*` step that
//! validates the current [`ChatPhase`] and hands back what must be sent, and
//! a `finish_*` step that applies the outcome. The caller runs the actual
//! I/O in between, so the view never blocks the event loop and all entry
//! points are guarded by one state value instead of scattered flags.

use bytes::Bytes;
use log::{ debug, info, warn };
use std::fmt;
use std::sync::atomic::{ AtomicU64, Ordering };
use crate::api::ApiError;
use crate::format;
use crate::markdown;
use crate::media::{ decode_reply_audio, AudioCapture, AudioClip, MediaError, DEFAULT_RECORDING_MIME };
use crate::models::chat::{ Conversation, Message, Sender, User };
use crate::models::wire::{ StoredMessage, VoiceReply };

pub const NO_TRANSCRIPT: &str = "[No transcript]";
pub const NO_AI_RESPONSE: &str = "[No AI response]";
const SEND_FAILED: &str = "Failed to send message";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide, so ids never repeat across views or lists.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    Sending,
    RequestingPermission,
    Recording,
    Uploading,
}

impl fmt::Display for ChatPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChatPhase::Idle => "idle",
            ChatPhase::Sending => "sending",
            ChatPhase::RequestingPermission => "requesting-permission",
            ChatPhase::Recording => "recording",
            ChatPhase::Uploading => "uploading",
        };
        write!(f, "{}", label)
    }
}

/// The capture owns buffering; everything recorded comes back from `stop`.
struct RecordingSession {
    elapsed_seconds: u64,
    capture: Box<dyn AudioCapture>,
}

enum Activity {
    Idle,
    Sending,
    RequestingPermission,
    Recording(RecordingSession),
    Uploading(Box<dyn AudioCapture>),
}

fn phase_of(activity: &Activity) -> ChatPhase {
    match activity {
        Activity::Idle => ChatPhase::Idle,
        Activity::Sending => ChatPhase::Sending,
        Activity::RequestingPermission => ChatPhase::RequestingPermission,
        Activity::Recording(_) => ChatPhase::Recording,
        Activity::Uploading(_) => ChatPhase::Uploading,
    }
}

/// Identifies one history fetch. Only the most recently issued ticket may
/// update the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTicket {
    pub conversation_id: i64,
    generation: u64,
}

/// Names the view and conversation a request was issued from. A completion
/// is only applied to the view holding the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewToken {
    pub conversation_id: i64,
    view_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub token: ViewToken,
    pub conversation_id: i64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PendingVoice {
    pub token: ViewToken,
    pub conversation_id: i64,
    pub user_id: i64,
    pub clip: AudioClip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub sender: Sender,
    pub html: String,
    pub time: String,
}

pub struct ChatView {
    user: User,
    conversation: Conversation,
    messages: Vec<Message>,
    input: String,
    error: Option<String>,
    activity: Activity,
    view_id: u64,
    pending_history: Option<HistoryTicket>,
}

impl ChatView {
    pub fn new(user: User, conversation: Conversation) -> Self {
        Self {
            user,
            conversation,
            messages: Vec::new(),
            input: String::new(),
            error: None,
            activity: Activity::Idle,
            view_id: next_id(),
            pending_history: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn token(&self) -> ViewToken {
        ViewToken {
            conversation_id: self.conversation.id,
            view_id: self.view_id,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn phase(&self) -> ChatPhase {
        phase_of(&self.activity)
    }

    pub fn is_loading_history(&self) -> bool {
        self.pending_history.is_some()
    }

    /// Whether the typing indicator should show.
    pub fn is_busy(&self) -> bool {
        self.is_loading_history() || matches!(self.phase(), ChatPhase::Sending | ChatPhase::Uploading)
    }

    pub fn can_send(&self) -> bool {
        self.phase() == ChatPhase::Idle && !self.is_loading_history()
    }

    pub fn can_record(&self) -> bool {
        self.phase() == ChatPhase::Idle && !self.is_loading_history()
    }

    pub fn elapsed_seconds(&self) -> Option<u64> {
        match &self.activity {
            Activity::Recording(session) => Some(session.elapsed_seconds),
            _ => None,
        }
    }

    pub fn elapsed_label(&self) -> Option<String> {
        self.elapsed_seconds().map(format::elapsed)
    }

    // --- history ---

    /// Starts a fresh fetch of the whole history, superseding any fetch
    /// still in flight.
    pub fn begin_load(&mut self) -> HistoryTicket {
        let ticket = HistoryTicket {
            conversation_id: self.conversation.id,
            generation: next_id(),
        };
        self.pending_history = Some(ticket);
        self.error = None;
        ticket
    }

    /// Applies a fetched history. Returns `false` when the ticket is stale
    /// and the result was discarded.
    pub fn finish_load(
        &mut self,
        ticket: HistoryTicket,
        result: Result<Vec<StoredMessage>, ApiError>
    ) -> bool {
        if self.pending_history != Some(ticket) {
            debug!(
                "Discarding stale history for conversation {} (showing {})",
                ticket.conversation_id,
                self.conversation.id
            );
            return false;
        }
        self.pending_history = None;

        match result {
            Ok(stored) => {
                self.messages = stored
                    .into_iter()
                    .map(|m| Message::new(m.sender, m.message))
                    .collect();
                info!(
                    "Loaded {} messages for conversation {}",
                    self.messages.len(),
                    self.conversation.id
                );
            }
            Err(e) => {
                warn!("Failed to load messages for conversation {}: {}", self.conversation.id, e);
                self.error = Some(format!("Failed to load messages: {}", e));
            }
        }
        true
    }

    /// Points the view at another conversation. Returns the ticket for its
    /// history, or `None` when it is already shown or the view is busy
    /// sending or recording.
    pub fn select_conversation(&mut self, conversation: Conversation) -> Option<HistoryTicket> {
        if conversation.id == self.conversation.id || self.phase() != ChatPhase::Idle {
            return None;
        }
        self.conversation = conversation;
        self.messages.clear();
        Some(self.begin_load())
    }

    // --- text ---

    /// Takes the composer text for sending. Blank input is left untouched
    /// and nothing is sent. Otherwise the input is cleared and the message
    /// shows up in the history before the backend has seen it.
    pub fn begin_send(&mut self) -> Option<PendingSend> {
        if !self.can_send() {
            debug!("Send ignored while {}", self.phase());
            return None;
        }
        let message = self.input.trim().to_string();
        if message.is_empty() {
            return None;
        }

        self.input.clear();
        self.error = None;
        self.messages.push(Message::user(message.clone()));
        self.activity = Activity::Sending;
        Some(PendingSend {
            token: self.token(),
            conversation_id: self.conversation.id,
            message,
        })
    }

    /// Shorthand for `set_input` followed by `begin_send`.
    pub fn submit(&mut self, text: impl Into<String>) -> Option<PendingSend> {
        self.set_input(text);
        self.begin_send()
    }

    /// The optimistic user message stays in place on failure. Returns
    /// `false` when the reply belongs to another view or nothing was sent.
    pub fn finish_send(&mut self, token: ViewToken, result: Result<String, ApiError>) -> bool {
        if token != self.token() {
            debug!("Discarding reply for conversation {}", token.conversation_id);
            return false;
        }
        if self.phase() != ChatPhase::Sending {
            warn!("Reply arrived while {}; ignoring", self.phase());
            return false;
        }
        self.activity = Activity::Idle;

        match result {
            Ok(reply) => self.messages.push(Message::ai(reply)),
            Err(e) => {
                let text = e.to_string();
                warn!("Message send failed: {}", text);
                self.error = Some(if text.is_empty() { SEND_FAILED.to_string() } else { text });
            }
        }
        true
    }

    // --- voice ---

    /// Moves to `RequestingPermission`; the caller should now open the
    /// microphone and report back through [`ChatView::recording_started`].
    pub fn begin_recording(&mut self) -> Option<ViewToken> {
        if !self.can_record() {
            debug!("Record ignored while {}", self.phase());
            return None;
        }
        self.activity = Activity::RequestingPermission;
        Some(self.token())
    }

    /// A grant that is not for this view, or arrives when no longer asked
    /// for, is released on the spot. Returns whether the outcome applied.
    pub fn recording_started(
        &mut self,
        token: ViewToken,
        result: Result<Box<dyn AudioCapture>, MediaError>
    ) -> bool {
        if token != self.token() || self.phase() != ChatPhase::RequestingPermission {
            if let Ok(mut capture) = result {
                warn!("Microphone granted while {}; releasing it", self.phase());
                capture.release();
            }
            return false;
        }

        match result {
            Ok(capture) => {
                info!("Recording started for conversation {}", self.conversation.id);
                self.activity = Activity::Recording(RecordingSession {
                    elapsed_seconds: 0,
                    capture,
                });
            }
            Err(e) => {
                warn!("Microphone access error: {}", e);
                self.activity = Activity::Idle;
                self.error = Some(format!("Microphone access error: {}", e));
            }
        }
        true
    }

    /// One second of recording has passed.
    pub fn tick(&mut self) -> bool {
        match &mut self.activity {
            Activity::Recording(session) => {
                session.elapsed_seconds += 1;
                true
            }
            _ => false,
        }
    }

    /// Ends capture and packages the audio for upload. The device stays
    /// held until [`ChatView::finish_voice`] runs.
    pub async fn stop_recording(&mut self) -> Option<PendingVoice> {
        let mut session = match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Recording(session) => session,
            other => {
                self.activity = other;
                return None;
            }
        };

        let chunks: Vec<Bytes> = match session.capture.stop().await {
            Ok(chunks) => chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            Err(e) => {
                warn!("Stopping capture failed: {}", e);
                session.capture.release();
                self.error = Some(format!("Voice processing failed: {}", e));
                return None;
            }
        };

        let mime = match session.capture.mime_type() {
            "" => DEFAULT_RECORDING_MIME.to_string(),
            mime => mime.to_string(),
        };
        let clip = AudioClip::from_chunks(&chunks, &mime);
        info!(
            "Recording stopped after {}s: {} chunks, {} bytes",
            session.elapsed_seconds,
            chunks.len(),
            clip.bytes.len()
        );

        self.error = None;
        self.activity = Activity::Uploading(session.capture);
        Some(PendingVoice {
            token: self.token(),
            conversation_id: self.conversation.id,
            user_id: self.user.id,
            clip,
        })
    }

    /// Applies the upload outcome, releases the device and returns to idle.
    /// Returns the synthesized reply audio when there is some to play.
    pub fn finish_voice(&mut self, token: ViewToken, result: Result<VoiceReply, ApiError>) -> Option<AudioClip> {
        if token != self.token() {
            debug!("Discarding voice reply for conversation {}", token.conversation_id);
            return None;
        }
        match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Uploading(mut capture) => capture.release(),
            other => {
                warn!("Voice reply arrived while {}; ignoring", phase_of(&other));
                self.activity = other;
                return None;
            }
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Voice processing failed: {}", e);
                self.error = Some(format!("Voice processing failed: {}", e));
                return None;
            }
        };

        let audio = match reply.audio_data.as_deref().filter(|d| !d.is_empty()) {
            Some(data) =>
                match decode_reply_audio(data, reply.content_type.as_deref()) {
                    Ok(clip) => Some(clip),
                    Err(e) => {
                        self.error = Some(format!("Error creating audio: {}", e));
                        None
                    }
                }
            None => None,
        };

        let transcript = reply.user_message.filter(|m| !m.is_empty());
        let answer = reply.ai_message.filter(|m| !m.is_empty());
        self.messages.push(Message::user(transcript.unwrap_or_else(|| NO_TRANSCRIPT.to_string())));
        self.messages.push(Message::ai(answer.unwrap_or_else(|| NO_AI_RESPONSE.to_string())));
        audio
    }

    pub fn playback_failed(&mut self, err: &MediaError) {
        warn!("Audio playback failed: {}", err);
        self.error = Some(format!("Audio playback failed: {}", err));
    }

    /// Releases whatever device the view still holds. Runs on drop.
    pub fn teardown(&mut self) {
        match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Recording(mut session) => {
                info!("Discarding recording in progress");
                session.capture.release();
            }
            Activity::Uploading(mut capture) => capture.release(),
            _ => {}
        }
        self.pending_history = None;
    }

    // --- rendering ---

    pub fn rendered(&self) -> Vec<RenderedMessage> {
        self.messages
            .iter()
            .map(|m| RenderedMessage {
                sender: m.sender,
                html: markdown::render_or_raw(&m.message),
                time: format::message_time(&m.timestamp),
            })
            .collect()
    }

    /// A standalone HTML page of the conversation built only from sanitized
    /// fragments.
    pub fn transcript_html(&self) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        out.push_str(&format!("<title>Conversation {}</title>\n", self.conversation.id));
        out.push_str("</head>\n<body>\n");
        for msg in self.rendered() {
            let class = match msg.sender {
                Sender::User => "user",
                Sender::Ai => "ai",
            };
            out.push_str(&format!(
                "<div class=\"message {}\">\n<div class=\"body\">{}</div>\n<div class=\"time\">{}</div>\n</div>\n",
                class,
                msg.html,
                ammonia::clean_text(&msg.time)
            ));
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake;

    fn view() -> ChatView {
        ChatView::new(
            User { id: 1, email: "guest@example.com".into() },
            Conversation { id: 5, user_id: 1, created_at: None, latest_message: None }
        )
    }

    fn conversation(id: i64) -> Conversation {
        Conversation { id, user_id: 1, created_at: None, latest_message: None }
    }

    fn server_error(body: &str) -> ApiError {
        ApiError::Server { status: 500, body: body.into() }
    }

    fn stored(sender: Sender, text: &str) -> StoredMessage {
        StoredMessage { sender, message: text.into() }
    }

    fn history(view: &ChatView) -> Vec<(Sender, String)> {
        view.messages().iter().map(|m| (m.sender, m.message.clone())).collect()
    }

    async fn recording_view(tail: &[&[u8]]) -> (ChatView, fake::DeviceMonitor) {
        let mut chat = view();
        let token = chat.begin_recording().unwrap();
        let (capture, device) = fake::capture(tail);
        assert!(chat.recording_started(token, Ok(capture)));
        assert_eq!(chat.phase(), ChatPhase::Recording);
        (chat, device)
    }

    #[test]
    fn send_appends_user_then_ai() {
        let mut chat = view();
        let pending = chat.submit("  Hello  ").unwrap();
        assert_eq!(pending.conversation_id, 5);
        assert_eq!(pending.message, "Hello");
        assert_eq!(pending.token, chat.token());
        assert_eq!(chat.input(), "");
        assert_eq!(chat.phase(), ChatPhase::Sending);
        assert_eq!(history(&chat), vec![(Sender::User, "Hello".to_string())]);

        assert!(chat.finish_send(pending.token, Ok("Welcome to the hotel".into())));
        assert_eq!(chat.phase(), ChatPhase::Idle);
        assert_eq!(
            history(&chat),
            vec![(Sender::User, "Hello".to_string()), (Sender::Ai, "Welcome to the hotel".to_string())]
        );
        assert!(chat.error().is_none());
    }

    #[test]
    fn failed_send_keeps_optimistic_message() {
        let mut chat = view();
        let pending = chat.submit("Room service?").unwrap();
        chat.finish_send(pending.token, Err(server_error("backend down")));
        assert_eq!(history(&chat), vec![(Sender::User, "Room service?".to_string())]);
        assert_eq!(chat.error(), Some("backend down"));
        assert_eq!(chat.phase(), ChatPhase::Idle);
    }

    #[test]
    fn failed_send_with_empty_text_uses_generic_message() {
        let mut chat = view();
        let pending = chat.submit("hi").unwrap();
        chat.finish_send(pending.token, Err(ApiError::Transport(String::new())));
        assert_eq!(chat.error(), Some(SEND_FAILED));
    }

    #[test]
    fn blank_input_does_nothing() {
        let mut chat = view();
        assert!(chat.submit("   \n\t ").is_none());
        assert!(chat.messages().is_empty());
        assert_eq!(chat.phase(), ChatPhase::Idle);
        assert_eq!(chat.input(), "   \n\t ");
    }

    #[test]
    fn only_one_send_in_flight() {
        let mut chat = view();
        chat.submit("first").unwrap();
        assert!(chat.submit("second").is_none());
        assert!(chat.begin_recording().is_none());
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.input(), "second");
    }

    #[test]
    fn stray_reply_is_ignored() {
        let mut chat = view();
        let token = chat.token();
        assert!(!chat.finish_send(token, Ok("unexpected".into())));
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn reply_for_another_view_is_ignored() {
        let mut left = view();
        let stale = left.submit("question for A").unwrap();
        drop(left);

        let mut current = view();
        let pending = current.submit("question for B").unwrap();
        assert_ne!(stale.token, pending.token);

        assert!(!current.finish_send(stale.token, Ok("answer for A".into())));
        assert_eq!(history(&current), vec![(Sender::User, "question for B".to_string())]);
        assert_eq!(current.phase(), ChatPhase::Sending);

        assert!(current.finish_send(pending.token, Ok("answer for B".into())));
        assert_eq!(
            history(&current),
            vec![(Sender::User, "question for B".to_string()), (Sender::Ai, "answer for B".to_string())]
        );
    }

    #[test]
    fn reopened_conversation_gets_fresh_ticket_and_token() {
        let mut first = view();
        let mut second = view();
        assert_ne!(first.token(), second.token());
        let old = first.begin_load();
        second.begin_load();
        assert!(!second.finish_load(old, Ok(vec![stored(Sender::User, "stale")])));
        assert!(second.messages().is_empty());
        assert!(second.is_loading_history());
    }

    #[test]
    fn history_load_replaces_messages() {
        let mut chat = view();
        let pending = chat.submit("local").unwrap();
        chat.finish_send(pending.token, Ok("reply".into()));

        let ticket = chat.begin_load();
        assert!(chat.is_loading_history());
        assert!(!chat.can_send());
        assert!(chat.finish_load(ticket, Ok(vec![stored(Sender::Ai, "from server")])));
        assert_eq!(history(&chat), vec![(Sender::Ai, "from server".to_string())]);
        assert!(!chat.is_loading_history());
    }

    #[test]
    fn history_error_is_prefixed() {
        let mut chat = view();
        let ticket = chat.begin_load();
        chat.finish_load(ticket, Err(server_error("not found")));
        assert_eq!(chat.error(), Some("Failed to load messages: not found"));
    }

    #[test]
    fn stale_history_does_not_overwrite_newer_selection() {
        let mut chat = view();
        let first = chat.begin_load();
        let second = chat.select_conversation(conversation(6)).unwrap();
        assert_eq!(second.conversation_id, 6);

        chat.finish_load(second, Ok(vec![stored(Sender::User, "conversation six")]));
        assert!(!chat.finish_load(first, Ok(vec![stored(Sender::User, "conversation five")])));
        assert_eq!(history(&chat), vec![(Sender::User, "conversation six".to_string())]);
        assert_eq!(chat.conversation().id, 6);
    }

    #[test]
    fn stale_history_arriving_first_is_also_ignored() {
        let mut chat = view();
        let first = chat.begin_load();
        let second = chat.select_conversation(conversation(6)).unwrap();
        assert!(!chat.finish_load(first, Ok(vec![stored(Sender::User, "old")])));
        assert!(chat.messages().is_empty());
        assert!(chat.is_loading_history());
        assert!(chat.finish_load(second, Ok(vec![])));
    }

    #[test]
    fn reselecting_same_conversation_does_not_reload() {
        let mut chat = view();
        assert!(chat.select_conversation(conversation(5)).is_none());
    }

    #[test]
    fn permission_denied_returns_to_idle() {
        let mut chat = view();
        let token = chat.begin_recording().unwrap();
        assert_eq!(chat.phase(), ChatPhase::RequestingPermission);
        assert!(!chat.can_send());
        chat.recording_started(token, Err(MediaError::Unavailable("Permission denied".into())));
        assert_eq!(chat.phase(), ChatPhase::Idle);
        assert_eq!(chat.error(), Some("Microphone access error: Permission denied"));
    }

    #[tokio::test]
    async fn ticks_only_count_while_recording() {
        assert!(!view().tick());
        let (mut chat, _device) = recording_view(&[]).await;
        assert!(chat.tick());
        assert!(chat.tick());
        assert_eq!(chat.elapsed_label().as_deref(), Some("00:02"));
        chat.stop_recording().await.unwrap();
        assert!(!chat.tick());
        assert!(chat.elapsed_seconds().is_none());
    }

    #[tokio::test]
    async fn text_send_is_blocked_while_recording() {
        let (mut chat, _device) = recording_view(&[]).await;
        assert!(chat.submit("typed during recording").is_none());
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn stop_concatenates_chunks_in_order() {
        let (mut chat, device) = recording_view(&[b"ab", b"", b"cd"]).await;

        let pending = chat.stop_recording().await.unwrap();
        assert_eq!(&pending.clip.bytes[..], b"abcd");
        assert_eq!(pending.clip.mime, DEFAULT_RECORDING_MIME);
        assert_eq!(pending.conversation_id, 5);
        assert_eq!(pending.user_id, 1);
        assert_eq!(chat.phase(), ChatPhase::Uploading);
        assert!(!device.is_released());
    }

    #[tokio::test]
    async fn successful_voice_adds_transcript_then_reply_and_releases() {
        let (mut chat, device) = recording_view(&[b"audio"]).await;
        let pending = chat.stop_recording().await.unwrap();

        let audio = chat.finish_voice(pending.token, Ok(VoiceReply {
            user_message: Some("Is breakfast included?".into()),
            ai_message: Some("Yes, from 7 to 10.".into()),
            audio_data: Some("aGVsbG8=".into()),
            content_type: None,
        }));

        assert_eq!(
            history(&chat),
            vec![
                (Sender::User, "Is breakfast included?".to_string()),
                (Sender::Ai, "Yes, from 7 to 10.".to_string())
            ]
        );
        let audio = audio.unwrap();
        assert_eq!(&audio.bytes[..], b"hello");
        assert_eq!(audio.mime, "audio/mpeg");
        assert_eq!(device.release_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.phase(), ChatPhase::Idle);

        drop(chat);
        assert_eq!(device.release_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_voice_adds_nothing_and_releases() {
        let (mut chat, device) = recording_view(&[b"audio"]).await;
        let pending = chat.stop_recording().await.unwrap();

        assert!(chat.finish_voice(pending.token, Err(server_error("Audio too short"))).is_none());
        assert!(chat.messages().is_empty());
        assert_eq!(chat.error(), Some("Voice processing failed: Audio too short"));
        assert!(device.is_released());
        assert_eq!(chat.phase(), ChatPhase::Idle);
    }

    #[tokio::test]
    async fn missing_voice_fields_get_placeholders() {
        let (mut chat, _device) = recording_view(&[]).await;
        let pending = chat.stop_recording().await.unwrap();
        assert!(chat.finish_voice(pending.token, Ok(VoiceReply::default())).is_none());
        assert_eq!(
            history(&chat),
            vec![(Sender::User, NO_TRANSCRIPT.to_string()), (Sender::Ai, NO_AI_RESPONSE.to_string())]
        );
    }

    #[tokio::test]
    async fn undecodable_reply_audio_is_non_fatal() {
        let (mut chat, _device) = recording_view(&[]).await;
        let pending = chat.stop_recording().await.unwrap();
        let audio = chat.finish_voice(pending.token, Ok(VoiceReply {
            user_message: Some("hi".into()),
            ai_message: Some("hello".into()),
            audio_data: Some("!!not base64!!".into()),
            content_type: Some("audio/wav".into()),
        }));
        assert!(audio.is_none());
        assert_eq!(chat.messages().len(), 2);
        assert!(chat.error().unwrap().starts_with("Error creating audio: "));
    }

    #[tokio::test]
    async fn failing_capture_stop_still_releases() {
        let mut chat = view();
        let token = chat.begin_recording().unwrap();
        let device = fake::DeviceMonitor::default();
        chat.recording_started(token, Ok(Box::new(fake::FakeCapture {
            device: device.clone(),
            tail: Vec::new(),
            fail_stop: true,
        })));

        assert!(chat.stop_recording().await.is_none());
        assert!(device.is_released());
        assert_eq!(chat.phase(), ChatPhase::Idle);
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn late_grant_after_teardown_is_released() {
        let mut chat = view();
        let token = chat.begin_recording().unwrap();
        chat.teardown();
        let (capture, device) = fake::capture(&[]);
        assert!(!chat.recording_started(token, Ok(capture)));
        assert!(device.is_released());
        assert_eq!(chat.phase(), ChatPhase::Idle);
    }

    #[tokio::test]
    async fn grant_for_another_view_is_released_without_starting() {
        let mut left = view();
        let stale = left.begin_recording().unwrap();
        drop(left);

        let mut current = view();
        current.begin_recording().unwrap();
        let (capture, device) = fake::capture(&[]);
        assert!(!current.recording_started(stale, Ok(capture)));
        assert!(device.is_released());
        assert_eq!(current.phase(), ChatPhase::RequestingPermission);
    }

    #[tokio::test]
    async fn voice_reply_for_another_view_is_ignored() {
        let (mut left, _left_device) = recording_view(&[b"a"]).await;
        let stale = left.stop_recording().await.unwrap();
        drop(left);

        let (mut current, device) = recording_view(&[b"b"]).await;
        current.stop_recording().await.unwrap();
        let reply = VoiceReply {
            user_message: Some("hi".into()),
            ai_message: Some("hello".into()),
            audio_data: None,
            content_type: None,
        };
        assert!(current.finish_voice(stale.token, Ok(reply)).is_none());
        assert!(current.messages().is_empty());
        assert_eq!(current.phase(), ChatPhase::Uploading);
        assert!(!device.is_released());
    }

    #[tokio::test]
    async fn dropping_the_view_releases_the_microphone() {
        let (chat, device) = recording_view(&[]).await;
        drop(chat);
        assert!(device.is_released());
    }

    #[test]
    fn playback_failure_does_not_touch_history() {
        let mut chat = view();
        chat.playback_failed(&MediaError::Playback("no output device".into()));
        assert_eq!(chat.error(), Some("Audio playback failed: no output device"));
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn rendered_bodies_are_sanitized() {
        let mut chat = view();
        chat.submit("**hi** <script>steal()</script>").unwrap();
        let rendered = chat.rendered();
        assert_eq!(rendered.len(), 1);
        assert!(!rendered[0].html.contains("script"));
        assert!(rendered[0].html.contains("<strong>hi</strong>"));

        let page = chat.transcript_html();
        assert!(page.contains("<title>Conversation 5</title>"));
        assert!(!page.contains("steal"));
    }
}
