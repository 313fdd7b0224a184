pub mod api;
pub mod app;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod conversations;
pub mod format;
pub mod markdown;
pub mod media;
pub mod models;
pub mod session;
pub mod terminal;

use api::http::HttpApiClient;
use app::Shell;
use cli::Args;
use log::info;
use media::command::{ CommandMicrophone, CommandPlayer };
use session::{ default_session_path, FileSessionStore, Session };
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use terminal::Terminal;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let session_path = args.session_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_session_path);

    info!("--- Core Configuration ---");
    info!("API URL: {}", args.api_url);
    info!("Session Path: {}", session_path.display());
    info!("Record Command: {}", args.record_cmd);
    info!("Record MIME: {}", args.record_mime);
    info!("Play Command: {}", args.play_cmd);
    info!("Debug: {}", args.debug);
    info!("-------------------------");

    let api = Arc::new(HttpApiClient::new(&args.api_url)?);
    let session = Session::new(Box::new(FileSessionStore::new(session_path)));
    let shell = Shell::start(session);
    let microphone = Arc::new(CommandMicrophone::new(args.record_cmd.clone(), args.record_mime.clone()));
    let player = Arc::new(CommandPlayer::new(args.play_cmd.clone()));

    Terminal::new(shell, api, microphone, player).run().await
}
