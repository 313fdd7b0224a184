use std::path::PathBuf;

pub const AUTH_HELP: &str = "Type your email, then your password. :signup / :login switch screens, :quit exits.";
pub const LIST_HELP: &str = "Commands: new, open <n>, refresh, logout, quit";
pub const CHAT_HELP: &str = "Type a message and press enter. :rec records, :stop sends the recording, :export <file> saves an HTML transcript, :back returns, :quit exits.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCommand {
    Signup,
    Login,
    Quit,
    Help,
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCommand {
    New,
    /// Zero-based index into the displayed list.
    Open(usize),
    Refresh,
    Logout,
    Quit,
    Help,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Back,
    Record,
    Stop,
    Export(PathBuf),
    Quit,
    Help,
    Say(String),
}

pub fn parse_auth(line: &str) -> AuthCommand {
    match line.trim() {
        ":signup" => AuthCommand::Signup,
        ":login" => AuthCommand::Login,
        ":quit" => AuthCommand::Quit,
        ":help" => AuthCommand::Help,
        _ => AuthCommand::Field(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

pub fn parse_list(line: &str) -> ListCommand {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let arg = parts.next();
    match (command, arg) {
        ("new", None) => ListCommand::New,
        ("open", Some(n)) =>
            match n.parse::<usize>() {
                Ok(n) if n > 0 => ListCommand::Open(n - 1),
                _ => ListCommand::Unknown(line.trim().to_string()),
            }
        ("refresh", None) => ListCommand::Refresh,
        ("logout", None) => ListCommand::Logout,
        ("quit", None) | (":quit", None) => ListCommand::Quit,
        ("help", None) | (":help", None) => ListCommand::Help,
        _ => ListCommand::Unknown(line.trim().to_string()),
    }
}

/// Anything that is not a recognised `:` command is message text.
pub fn parse_chat(line: &str) -> ChatCommand {
    let trimmed = line.trim();
    match trimmed {
        ":back" => ChatCommand::Back,
        ":rec" => ChatCommand::Record,
        ":stop" => ChatCommand::Stop,
        ":quit" => ChatCommand::Quit,
        ":help" => ChatCommand::Help,
        _ =>
            match trimmed.strip_prefix(":export ") {
                Some(path) if !path.trim().is_empty() => ChatCommand::Export(PathBuf::from(path.trim())),
                _ => ChatCommand::Say(line.to_string()),
            }
    }
}
