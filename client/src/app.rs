//! Main Application
//!
//! Line-oriented REPL over one tutor session:
//! - Each input line is sent as a learner message
//! - The reply is rendered live as frames arrive
//! - Slash commands handle everything else

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use roleplay_core::{ConversationState, Section, Session, SessionId, SessionSettings};

use crate::daemon_client::DaemonClient;
use crate::display::{write_history, LiveRenderer};

/// What the user typed
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    History,
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line {
        "/quit" | "/exit" => Input::Quit,
        "/history" => Input::History,
        "/help" => Input::Help,
        _ if line.starts_with('/') => Input::Unknown(line),
        _ => Input::Message(line),
    }
}

const HELP: &str = "\
Type a message to continue the roleplay.
  /history  show the conversation so far
  /help     show this help
  /quit     leave";

/// Interactive session
pub struct App {
    client: DaemonClient,
    session_id: SessionId,
    settings: SessionSettings,
    model: Option<String>,
    state: ConversationState,
}

impl App {
    /// Attach to an existing daemon session
    pub async fn attach(
        client: DaemonClient,
        session_id: SessionId,
        model: Option<String>,
    ) -> anyhow::Result<Self> {
        let session = client.get_session(&session_id).await?;
        Ok(Self {
            client,
            session_id,
            settings: session.settings,
            model,
            state: ConversationState::from_messages(session.messages),
        })
    }

    /// Print the session header and any opening lines already present
    pub fn print_intro(&self) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "Practising {} (from {}): {}",
            self.settings.learning_language, self.settings.native_language, self.settings.situation
        )?;
        for message in self.state.messages().iter().filter(|m| !m.reply.is_empty()) {
            writeln!(out, "  {}: {}", Section::Reply.name(), message.reply)?;
            if !message.translation.is_empty() {
                writeln!(out, "  {}: {}", Section::Translation.name(), message.translation)?;
            }
        }
        writeln!(out, "Type /help for commands.")?;
        Ok(())
    }

    /// Read lines until `/quit` or end of input
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            prompt()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Quit => break,
                Input::Help => println!("{HELP}"),
                Input::History => self.show_history()?,
                Input::Unknown(command) => println!("Unknown command: {command}"),
                Input::Message(text) => self.send(text).await,
            }
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) {
        let mut renderer = LiveRenderer::new(io::stdout());
        let result = self
            .client
            .send_message(
                &self.session_id,
                text,
                self.model.as_deref(),
                &mut self.state,
                |message| {
                    if let Err(e) = renderer.update(message) {
                        tracing::warn!(error = %e, "Failed to render reply");
                    }
                },
            )
            .await;

        match result {
            Ok(id) => {
                if let Some(message) = self.state.get(&id) {
                    if let Err(e) = renderer.finish(message) {
                        tracing::warn!(error = %e, "Failed to render reply");
                    }
                }
            }
            Err(e) => eprintln!("  [rejected] {e}"),
        }
    }

    fn show_history(&self) -> io::Result<()> {
        let session = Session {
            messages: self.state.messages().to_vec(),
            ..Session::with_id(self.session_id.clone(), self.settings.clone())
        };
        let mut out = io::stdout().lock();
        write_history(&mut out, &session)
    }
}

fn prompt() -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "> ")?;
    out.flush()
}
