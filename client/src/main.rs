//! Roleplay Tutor Client
//!
//! Terminal client for the roleplay daemon. Creates (or resumes) a session
//! and runs an interactive conversation, printing the reply, its translation
//! and feedback as they stream in.
//!
//! # Usage
//!
//! ```bash
//! # New session with defaults
//! roleplay-client
//!
//! # Practise Spanish in a suggested situation, with an opening line
//! roleplay-client --learning Spanish --suggest-situation --greet
//!
//! # Resume a session
//! roleplay-client --session 3f2a...
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=roleplay_client=debug` for details.

mod app;
mod daemon_client;
mod display;

use clap::Parser;

use roleplay_core::{CreateSessionRequest, SessionId};

use crate::app::App;
use crate::daemon_client::DaemonClient;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "roleplay-client", version, about = "Practise a language through roleplay")]
struct Args {
    /// Daemon base URL
    #[arg(long, env = "ROLEPLAY_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Resume an existing session instead of creating one
    #[arg(long)]
    session: Option<String>,

    /// Language to practise
    #[arg(long)]
    learning: Option<String>,

    /// Your native language
    #[arg(long)]
    native: Option<String>,

    /// Roleplay situation
    #[arg(long, conflicts_with = "suggest_situation")]
    situation: Option<String>,

    /// Let the daemon pick a situation
    #[arg(long)]
    suggest_situation: bool,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Ask for an opening line from the tutor
    #[arg(long)]
    greet: bool,
}

impl Args {
    fn session_request(&self, situation: Option<String>) -> CreateSessionRequest {
        CreateSessionRequest {
            learning_language: self.learning.clone(),
            native_language: self.native.clone(),
            situation,
            model: self.model.clone(),
            greet: self.greet.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roleplay_client=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let client = DaemonClient::new(&args.server);

    let session_id = match &args.session {
        Some(id) => SessionId::from(id.as_str()),
        None => {
            let situation = if args.suggest_situation {
                Some(client.suggest_situation(args.learning.as_deref()).await?)
            } else {
                args.situation.clone()
            };
            let created = client.create_session(&args.session_request(situation)).await?;
            tracing::info!(
                session_id = %created.session_id,
                greeted = created.greeting.is_some(),
                "Session created"
            );
            created.session_id
        }
    };

    let mut app = App::attach(client, session_id, args.model.clone()).await?;
    app.print_intro()?;
    app.run().await
}
