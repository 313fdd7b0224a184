use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Args ---
    /// Base URL of the hotel assistant backend API (e.g., http://localhost:8000)
    #[arg(long, env = "API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    // --- Session Args ---
    /// File remembering the signed-in user between runs. Defaults to the platform data directory.
    #[arg(long, env = "SESSION_PATH")]
    pub session_path: Option<String>,

    // --- Audio Args ---
    /// Recorder command writing encoded audio to stdout until it is stopped.
    #[arg(long, env = "RECORD_CMD", default_value = "arecord -q -f cd -t wav -")]
    pub record_cmd: String,

    /// MIME type of what the recorder command produces.
    #[arg(long, env = "RECORD_MIME", default_value = "audio/wav")]
    pub record_mime: String,

    /// Player command; the path of the clip to play is appended as the last argument.
    #[arg(long, env = "PLAY_CMD", default_value = "ffplay -nodisp -autoexit -loglevel quiet")]
    pub play_cmd: String,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
