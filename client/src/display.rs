//! Terminal Rendering
//!
//! Prints an assistant turn while it streams. Frames replace whole section
//! values, so the renderer remembers what it already printed and only writes
//! the new suffix. A section that changes in any other way is printed again
//! on a fresh line.

use std::io::{self, Write};

use roleplay_core::{ConversationMessage, MessageRole, MessageStatus, Section, Session};

/// Incremental printer for one assistant turn
pub struct LiveRenderer<W: Write> {
    out: W,
    printed: [String; 3],
    current: Option<Section>,
}

fn index(section: Section) -> usize {
    match section {
        Section::Reply => 0,
        Section::Translation => 1,
        Section::Feedback => 2,
    }
}

impl<W: Write> LiveRenderer<W> {
    /// Render into `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: Default::default(),
            current: None,
        }
    }

    /// Print whatever changed in `message` since the last call
    pub fn update(&mut self, message: &ConversationMessage) -> io::Result<()> {
        for section in Section::ALL {
            let value = message.section(section);
            let printed = &self.printed[index(section)];
            if value == printed {
                continue;
            }

            if self.current != Some(section) {
                if self.current.is_some() {
                    writeln!(self.out)?;
                }
                write!(self.out, "  {}: ", section.name())?;
                self.current = Some(section);
                self.printed[index(section)].clear();
            }

            let printed = &self.printed[index(section)];
            if let Some(suffix) = value.strip_prefix(printed.as_str()) {
                write!(self.out, "{suffix}")?;
            } else {
                write!(self.out, "\n  {}: {value}", section.name())?;
            }
            self.printed[index(section)] = value.to_string();
        }
        self.out.flush()
    }

    /// Finish the turn: end the line and report an error resolution
    pub fn finish(&mut self, message: &ConversationMessage) -> io::Result<()> {
        self.update(message)?;
        if self.current.is_some() {
            writeln!(self.out)?;
        }
        if message.status == MessageStatus::Error {
            writeln!(
                self.out,
                "  [error] {}",
                message.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        self.out.flush()
    }

    /// Consume the renderer and return the writer
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Write a whole session history
pub fn write_history<W: Write>(out: &mut W, session: &Session) -> io::Result<()> {
    writeln!(
        out,
        "Session {} ({} -> {}, {})",
        session.id,
        session.settings.native_language,
        session.settings.learning_language,
        session.settings.situation
    )?;

    for message in &session.messages {
        match message.role {
            MessageRole::User => writeln!(out, "you: {}", message.text)?,
            MessageRole::Assistant => {
                writeln!(out, "tutor:")?;
                for section in Section::ALL {
                    let value = message.section(section);
                    if !value.is_empty() {
                        writeln!(out, "  {}: {value}", section.name())?;
                    }
                }
                if let Some(error) = &message.error {
                    writeln!(out, "  [error] {error}")?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use roleplay_core::{Frame, SessionSettings};

    fn rendered(renderer: LiveRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_streams_suffixes_per_section() {
        let mut message = ConversationMessage::assistant_pending();
        let mut renderer = LiveRenderer::new(Vec::new());

        for frame in [
            Frame::section(Section::Reply, "Hola"),
            Frame::section(Section::Reply, "Hola, ¿qué tal?"),
            Frame::section(Section::Translation, "Hi, how are you?"),
            Frame::Done,
        ] {
            message.apply(&frame);
            renderer.update(&message).unwrap();
        }
        renderer.finish(&message).unwrap();

        assert_eq!(
            rendered(renderer),
            "  reply: Hola, ¿qué tal?\n  translation: Hi, how are you?\n"
        );
    }

    #[test]
    fn test_rewritten_value_starts_new_line() {
        let mut message = ConversationMessage::assistant_pending();
        let mut renderer = LiveRenderer::new(Vec::new());

        message.apply(&Frame::section(Section::Reply, "Bonjour"));
        renderer.update(&message).unwrap();
        message.apply(&Frame::section(Section::Reply, "Bonsoir"));
        renderer.update(&message).unwrap();

        assert_eq!(rendered(renderer), "  reply: Bonjour\n  reply: Bonsoir");
    }

    #[test]
    fn test_error_is_reported() {
        let mut message = ConversationMessage::assistant_pending();
        let mut renderer = LiveRenderer::new(Vec::new());
        message.apply(&Frame::error("model crashed"));
        renderer.finish(&message).unwrap();

        assert_eq!(rendered(renderer), "  [error] model crashed\n");
    }

    #[test]
    fn test_history() {
        let mut session = Session::new(SessionSettings::default());
        session.push(ConversationMessage::user("Salut"));
        let mut reply = ConversationMessage::assistant_pending();
        reply.apply(&Frame::section(Section::Reply, "Salut !"));
        reply.apply(&Frame::Done);
        session.push(reply);

        let mut out = Vec::new();
        write_history(&mut out, &session).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("(English -> French, a casual conversation)"));
        assert!(text.contains("you: Salut\ntutor:\n  reply: Salut !\n"));
    }
}
