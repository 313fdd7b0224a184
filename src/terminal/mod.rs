pub mod commands;

use futures::Future;
use log::{ debug, info, warn };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::mpsc;
use tokio::time::{ interval_at, Instant, Interval };
use crate::api::{ ApiError, ChatApi };
use crate::app::{ Page, Shell };
use crate::auth::{ authenticate, AuthMode };
use crate::chat::{ ChatPhase, HistoryTicket, ViewToken };
use crate::conversations::LoadTicket;
use crate::format;
use crate::media::{ AudioCapture, AudioClip, AudioPlayer, MediaError, Microphone };
use crate::models::chat::{ Conversation, Message, Sender, User };
use crate::models::wire::{ StoredMessage, VoiceReply };
use self::commands::{ AuthCommand, ChatCommand, ListCommand };

const TICK: Duration = Duration::from_secs(1);

/// Everything that can wake the loop. Network and device completions come
/// back as events so that state only ever changes on the loop itself.
enum Event {
    Line(String),
    InputClosed,
    Authenticated(AuthMode, Result<User, ApiError>),
    ConversationsLoaded(LoadTicket, Result<Vec<Conversation>, ApiError>),
    ConversationCreated(Result<Conversation, ApiError>),
    HistoryLoaded(HistoryTicket, Result<Vec<StoredMessage>, ApiError>),
    Replied(ViewToken, Result<String, ApiError>),
    MicrophoneOpened(ViewToken, Result<Box<dyn AudioCapture>, MediaError>),
    VoiceReplied(ViewToken, Result<VoiceReply, ApiError>),
    PlaybackFinished(ViewToken, Result<(), MediaError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStep {
    Email,
    Password,
}

enum Flow {
    Continue,
    Quit,
}

pub struct Terminal {
    shell: Shell,
    api: Arc<dyn ChatApi>,
    microphone: Arc<dyn Microphone>,
    player: Arc<dyn AudioPlayer>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    auth_step: AuthStep,
    ticker: Option<Interval>,
    shown_error: Option<String>,
}

impl Terminal {
    pub fn new(
        shell: Shell,
        api: Arc<dyn ChatApi>,
        microphone: Arc<dyn Microphone>,
        player: Arc<dyn AudioPlayer>
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shell,
            api,
            microphone,
            player,
            events_tx,
            events_rx,
            auth_step: AuthStep::Email,
            ticker: None,
            shown_error: None,
        }
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.spawn_stdin_reader();
        self.enter_page();

        loop {
            let flow = tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => Flow::Quit,
                    }
                }
                _ = next_tick(&mut self.ticker) => {
                    self.on_tick();
                    Flow::Continue
                }
            };
            if let Flow::Quit = flow {
                break;
            }
        }

        if let Some(chat) = self.shell.chat() {
            chat.teardown();
        }
        info!("Goodbye");
        Ok(())
    }

    fn spawn_stdin_reader(&self) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(Event::Line(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(Event::InputClosed);
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        let _ = tx.send(Event::InputClosed);
                        break;
                    }
                }
            }
        });
    }

    fn spawn<F>(&self, task: F) where F: Future<Output = Event> + Send + 'static {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            if tx.send(event).is_err() {
                debug!("Event loop gone; dropping completion");
            }
        });
    }

    async fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Line(line) => {
                return self.on_line(line).await;
            }
            Event::InputClosed => {
                return Flow::Quit;
            }
            Event::Authenticated(mode, result) => self.on_authenticated(mode, result),
            Event::ConversationsLoaded(ticket, result) => {
                if let Some(list) = self.shell.conversations() {
                    if list.finish_load(ticket, result) {
                        self.print_conversations();
                    }
                }
            }
            Event::ConversationCreated(result) => {
                let created = self.shell.conversations().and_then(|list| list.finish_create(result));
                match created {
                    Some(conversation) => self.open(conversation),
                    None => self.print_list_error(),
                }
            }
            Event::HistoryLoaded(ticket, result) => {
                let applied = self.shell.chat().map(|chat| chat.finish_load(ticket, result));
                if applied == Some(true) {
                    self.print_history();
                }
            }
            Event::Replied(token, result) => {
                if let Some(chat) = self.shell.chat() {
                    if chat.finish_send(token, result) {
                        if let Some(last) = chat.messages().last().filter(|m| m.sender == Sender::Ai) {
                            print_message(last);
                        }
                    }
                }
                self.print_chat_error();
            }
            Event::MicrophoneOpened(token, result) => self.on_microphone(token, result),
            Event::VoiceReplied(token, result) => self.on_voice_reply(token, result),
            Event::PlaybackFinished(token, result) => {
                if let Err(e) = result {
                    if let Some(chat) = self.shell.chat().filter(|chat| chat.token() == token) {
                        chat.playback_failed(&e);
                    }
                    self.print_chat_error();
                }
            }
        }
        Flow::Continue
    }

    /// Work that happens whenever a page is (re)entered.
    fn enter_page(&mut self) {
        self.shown_error = None;
        match self.shell.page() {
            Page::Login | Page::Signup => {
                self.auth_step = AuthStep::Email;
                let form = self.shell.auth_form().map(|f| (f.mode(), f.hint()));
                match form {
                    Some((AuthMode::Signup, hint)) => {
                        println!("\n== Create an account ==");
                        if let Some(hint) = hint {
                            println!("({})", hint);
                        }
                    }
                    _ => println!("\n== Sign in =="),
                }
                println!("{}", commands::AUTH_HELP);
                prompt("Email: ");
            }
            Page::Conversations => {
                if let Some(user) = self.shell.user() {
                    println!("\n== Conversations for {} ==", user.email);
                }
                println!("{}", commands::LIST_HELP);
                self.refresh_conversations();
            }
            Page::Chat => {
                if let Some(chat) = self.shell.chat() {
                    println!("\n== Conversation {} ==", chat.conversation().id);
                }
                println!("{}", commands::CHAT_HELP);
            }
        }
    }

    async fn on_line(&mut self, line: String) -> Flow {
        match self.shell.page() {
            Page::Login | Page::Signup => self.on_auth_line(&line),
            Page::Conversations => self.on_list_line(&line),
            Page::Chat => self.on_chat_line(&line).await,
        }
    }

    fn on_auth_line(&mut self, line: &str) -> Flow {
        match commands::parse_auth(line) {
            AuthCommand::Quit => {
                return Flow::Quit;
            }
            AuthCommand::Help => {
                println!("{}", commands::AUTH_HELP);
            }
            AuthCommand::Signup => {
                self.shell.show_signup();
                self.enter_page();
            }
            AuthCommand::Login => {
                self.shell.show_login();
                self.enter_page();
            }
            AuthCommand::Field(value) => {
                let step = self.auth_step;
                let form = match self.shell.auth_form() {
                    Some(form) => form,
                    None => {
                        return Flow::Continue;
                    }
                };
                match step {
                    AuthStep::Email => {
                        form.email = value.trim().to_string();
                        self.auth_step = AuthStep::Password;
                        prompt("Password: ");
                    }
                    AuthStep::Password => {
                        form.password = value;
                        let mode = form.mode();
                        match form.begin_submit() {
                            Some(credentials) => {
                                println!("Signing in...");
                                let api = self.api.clone();
                                self.spawn(async move {
                                    let result = authenticate(api.as_ref(), mode, &credentials).await;
                                    Event::Authenticated(mode, result)
                                });
                            }
                            None => println!("Still waiting for the previous attempt."),
                        }
                        self.auth_step = AuthStep::Email;
                    }
                }
            }
        }
        Flow::Continue
    }

    fn on_authenticated(&mut self, mode: AuthMode, result: Result<User, ApiError>) {
        let form = match mode {
            AuthMode::Login => self.shell.login_form(),
            AuthMode::Signup => self.shell.signup_form(),
        };
        match form.finish_submit(result) {
            Some(user) => {
                println!("Welcome, {}!", user.email);
                self.shell.signed_in(user);
                self.enter_page();
            }
            None => {
                if let Some(err) = form.error() {
                    println!("! {}", err);
                }
                prompt("Email: ");
            }
        }
    }

    fn on_list_line(&mut self, line: &str) -> Flow {
        match commands::parse_list(line) {
            ListCommand::Quit => {
                return Flow::Quit;
            }
            ListCommand::Help => println!("{}", commands::LIST_HELP),
            ListCommand::Refresh => self.refresh_conversations(),
            ListCommand::Logout => {
                self.shell.logout();
                self.enter_page();
            }
            ListCommand::New => {
                let user_id = self.shell.conversations().and_then(|list| list.begin_create());
                match user_id {
                    Some(user_id) => {
                        let api = self.api.clone();
                        self.spawn(async move {
                            Event::ConversationCreated(api.create_conversation(user_id).await)
                        });
                    }
                    None => println!("Please wait..."),
                }
            }
            ListCommand::Open(index) => {
                let conversation = self.shell
                    .conversations()
                    .and_then(|list| list.get(index).cloned());
                match conversation {
                    Some(conversation) => self.open(conversation),
                    None => println!("No conversation number {}", index + 1),
                }
            }
            ListCommand::Unknown(text) => {
                if !text.is_empty() {
                    println!("Unknown command '{}'. {}", text, commands::LIST_HELP);
                }
            }
        }
        Flow::Continue
    }

    async fn on_chat_line(&mut self, line: &str) -> Flow {
        match commands::parse_chat(line) {
            ChatCommand::Quit => {
                return Flow::Quit;
            }
            ChatCommand::Help => println!("{}", commands::CHAT_HELP),
            ChatCommand::Back => {
                self.ticker = None;
                self.shell.back_to_conversations();
                self.enter_page();
            }
            ChatCommand::Record => {
                match self.shell.chat().and_then(|chat| chat.begin_recording()) {
                    Some(token) => {
                        println!("Requesting microphone...");
                        let microphone = self.microphone.clone();
                        self.spawn(async move { Event::MicrophoneOpened(token, microphone.open().await) });
                    }
                    None => println!("Cannot record right now."),
                }
            }
            ChatCommand::Stop => {
                self.ticker = None;
                let pending = match self.shell.chat() {
                    Some(chat) => chat.stop_recording().await,
                    None => None,
                };
                match pending {
                    Some(voice) => {
                        println!("Sending voice message...");
                        let api = self.api.clone();
                        self.spawn(async move {
                            let result = api.send_voice(voice.conversation_id, voice.user_id, voice.clip).await;
                            Event::VoiceReplied(voice.token, result)
                        });
                    }
                    None => self.print_chat_error(),
                }
            }
            ChatCommand::Export(path) => {
                if let Some(chat) = self.shell.chat() {
                    match tokio::fs::write(&path, chat.transcript_html()).await {
                        Ok(()) => println!("Transcript written to {}", path.display()),
                        Err(e) => println!("! Could not write {}: {}", path.display(), e),
                    }
                }
            }
            ChatCommand::Say(text) => {
                let pending = self.shell.chat().and_then(|chat| chat.submit(text));
                match pending {
                    Some(send) => {
                        let api = self.api.clone();
                        self.spawn(async move {
                            Event::Replied(send.token, api.send_message(send.conversation_id, &send.message).await)
                        });
                    }
                    None => {
                        let busy = self.shell.chat().map(|chat| !chat.can_send()).unwrap_or(false);
                        if busy {
                            println!("(busy, message not sent)");
                        }
                    }
                }
            }
        }
        Flow::Continue
    }

    fn on_microphone(&mut self, token: ViewToken, result: Result<Box<dyn AudioCapture>, MediaError>) {
        let chat = match self.shell.chat() {
            Some(chat) => chat,
            None => {
                if let Ok(mut capture) = result {
                    capture.release();
                }
                return;
            }
        };
        if chat.recording_started(token, result) && chat.phase() == ChatPhase::Recording {
            println!("● Recording {} (:stop to send)", format::elapsed(0));
            self.ticker = Some(interval_at(Instant::now() + TICK, TICK));
        } else {
            self.print_chat_error();
        }
    }

    fn on_tick(&mut self) {
        let label = match self.shell.chat() {
            Some(chat) => {
                if chat.tick() { chat.elapsed_label() } else { None }
            }
            None => None,
        };
        match label {
            Some(label) => println!("● Recording {}", label),
            None => {
                self.ticker = None;
            }
        }
    }

    fn on_voice_reply(&mut self, token: ViewToken, result: Result<VoiceReply, ApiError>) {
        let audio = match self.shell.chat() {
            Some(chat) => {
                let before = chat.messages().len();
                let audio = chat.finish_voice(token, result);
                for message in &chat.messages()[before..] {
                    print_message(message);
                }
                audio
            }
            None => None,
        };
        self.print_chat_error();
        if let Some(clip) = audio {
            self.play(token, clip);
        }
    }

    fn play(&self, token: ViewToken, clip: AudioClip) {
        let player = self.player.clone();
        self.spawn(async move { Event::PlaybackFinished(token, player.play(clip).await) });
    }

    fn open(&mut self, conversation: Conversation) {
        if let Some(ticket) = self.shell.open_conversation(conversation) {
            self.enter_page();
            println!("Loading messages...");
            let api = self.api.clone();
            self.spawn(async move {
                Event::HistoryLoaded(ticket, api.list_messages(ticket.conversation_id).await)
            });
        }
    }

    fn refresh_conversations(&mut self) {
        let ticket = match self.shell.conversations() {
            Some(list) => list.begin_load(),
            None => {
                return;
            }
        };
        let api = self.api.clone();
        self.spawn(async move {
            Event::ConversationsLoaded(ticket, api.list_conversations(ticket.user_id).await)
        });
    }

    fn print_conversations(&mut self) {
        let rows = match self.shell.conversations() {
            Some(list) => {
                if let Some(err) = list.error() {
                    println!("! {}", err);
                    return;
                }
                list.rows()
            }
            None => {
                return;
            }
        };
        if rows.is_empty() {
            println!("No conversations yet. Type 'new' to start one.");
            return;
        }
        for (i, row) in rows.iter().enumerate() {
            println!("{:>3}. #{:<5} {:<20} {}", i + 1, row.id, row.date, row.preview);
        }
    }

    fn print_list_error(&mut self) {
        if let Some(err) = self.shell.conversations().and_then(|list| list.error().map(str::to_string)) {
            println!("! {}", err);
        }
    }

    fn print_history(&mut self) {
        if let Some(chat) = self.shell.chat() {
            if chat.messages().is_empty() && chat.error().is_none() {
                println!("No messages yet. Say hello!");
            }
            for message in chat.messages() {
                print_message(message);
            }
        }
        self.print_chat_error();
    }

    /// Prints the chat error once per distinct occurrence.
    fn print_chat_error(&mut self) {
        let current = self.shell.chat().and_then(|chat| chat.error().map(str::to_string));
        if current.is_some() && current != self.shown_error {
            if let Some(err) = &current {
                println!("! {}", err);
            }
        }
        self.shown_error = current;
    }
}

fn print_message(message: &Message) {
    let who = match message.sender {
        Sender::User => "You",
        Sender::Ai => "Assistant",
    };
    println!("[{}] {}: {}", format::message_time(&message.timestamp), who, message.message);
}

fn prompt(text: &str) {
    use std::io::Write;
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}
