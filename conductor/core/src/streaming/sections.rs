//! Section Parser
//!
//! Explicit state machine that splits raw generated text into the reply,
//! translation and feedback sections.
//!
//! ```text
//!              <reply>            </reply>
//! NoSection ───────────► InReply ─────────► Closed
//!     │                     │ <translation>    │ <feedback>
//!     │                     ▼                  ▼
//!     └───────────────► InTranslation     InFeedback ...
//! ```
//!
//! An opening tag enters its section from any state. A matching closing tag
//! moves to `Closed`, where stray text between sections is dropped. Tags match
//! ASCII case-insensitively. A trailing fragment that could still grow into a
//! tag (`<`, `</tr`, `<FEED`) is held back until the next increment decides it.

use crate::transport::{Frame, Section};

/// Parser state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionState {
    /// No marker seen yet
    NoSection,
    /// Inside `<reply>`
    InReply,
    /// Inside `<translation>`
    InTranslation,
    /// Inside `<feedback>`
    InFeedback,
    /// Between sections, after a closing tag
    Closed,
}

impl SectionState {
    fn entering(section: Section) -> Self {
        match section {
            Section::Reply => Self::InReply,
            Section::Translation => Self::InTranslation,
            Section::Feedback => Self::InFeedback,
        }
    }

    /// The section currently receiving text
    #[must_use]
    pub fn section(&self) -> Option<Section> {
        match self {
            Self::InReply => Some(Section::Reply),
            Self::InTranslation => Some(Section::Translation),
            Self::InFeedback => Some(Section::Feedback),
            Self::NoSection | Self::Closed => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Open(Section),
    Close(Section),
}

const MARKERS: [(&str, Marker); 6] = [
    ("<reply>", Marker::Open(Section::Reply)),
    ("</reply>", Marker::Close(Section::Reply)),
    ("<translation>", Marker::Open(Section::Translation)),
    ("</translation>", Marker::Close(Section::Translation)),
    ("<feedback>", Marker::Open(Section::Feedback)),
    ("</feedback>", Marker::Close(Section::Feedback)),
];

enum MarkerMatch {
    /// A complete marker of the given byte length
    Full(Marker, usize),
    /// Input ends inside something that may still become a marker
    Partial,
    /// Not a marker
    None,
}

/// Classify the text starting at a `<`
fn match_marker(rest: &str) -> MarkerMatch {
    let rest = rest.as_bytes();
    let mut partial = false;

    for (tag, marker) in MARKERS {
        let tag = tag.as_bytes();
        if rest.len() >= tag.len() {
            if rest[..tag.len()].eq_ignore_ascii_case(tag) {
                return MarkerMatch::Full(marker, tag.len());
            }
        } else if tag[..rest.len()].eq_ignore_ascii_case(rest) {
            partial = true;
        }
    }

    if partial {
        MarkerMatch::Partial
    } else {
        MarkerMatch::None
    }
}

/// Final, trimmed section values of a turn
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionValues {
    /// Reply text
    pub reply: String,
    /// Translation text
    pub translation: String,
    /// Feedback text
    pub feedback: String,
}

/// Incremental section parser
#[derive(Debug)]
pub struct SectionParser {
    state: SectionState,
    /// Unconsumed input held back as a possible marker prefix
    pending: String,
    /// Text seen before any marker
    preamble: String,
    values: [String; 3],
    /// Last value sent for each section
    emitted: [Option<String>; 3],
    saw_marker: bool,
}

impl Default for SectionParser {
    fn default() -> Self {
        Self::new()
    }
}

fn index(section: Section) -> usize {
    match section {
        Section::Reply => 0,
        Section::Translation => 1,
        Section::Feedback => 2,
    }
}

impl SectionParser {
    /// Create a parser in the `NoSection` state
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SectionState::NoSection,
            pending: String::new(),
            preamble: String::new(),
            values: Default::default(),
            emitted: Default::default(),
            saw_marker: false,
        }
    }

    /// Parse a complete text in one go
    #[must_use]
    pub fn parse_complete(text: &str) -> SectionValues {
        let mut parser = Self::new();
        let _ = parser.feed(text);
        let _ = parser.finish();
        parser.values()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SectionState {
        self.state
    }

    /// Feed one text increment
    ///
    /// Returns a frame for every section whose best-known value changed.
    pub fn feed(&mut self, increment: &str) -> Vec<Frame> {
        self.pending.push_str(increment);
        let input = std::mem::take(&mut self.pending);
        let mut rest = input.as_str();

        while !rest.is_empty() {
            let Some(idx) = rest.find('<') else {
                self.push_text(rest);
                rest = "";
                break;
            };

            self.push_text(&rest[..idx]);
            rest = &rest[idx..];

            match match_marker(rest) {
                MarkerMatch::Full(marker, len) => {
                    self.transition(marker);
                    rest = &rest[len..];
                }
                MarkerMatch::Partial => break,
                MarkerMatch::None => {
                    self.push_text("<");
                    rest = &rest[1..];
                }
            }
        }

        self.pending = rest.to_string();
        self.changed_frames()
    }

    /// End of input: flush held-back text and any open section
    ///
    /// If no marker was ever seen, the whole text becomes the reply.
    pub fn finish(&mut self) -> Vec<Frame> {
        let held = std::mem::take(&mut self.pending);
        self.push_text(&held);

        if !self.saw_marker {
            self.values[index(Section::Reply)] = std::mem::take(&mut self.preamble);
        }
        if self.state.section().is_some() {
            self.state = SectionState::Closed;
        }

        self.changed_frames()
    }

    /// Current trimmed section values
    #[must_use]
    pub fn values(&self) -> SectionValues {
        SectionValues {
            reply: self.values[0].trim().to_string(),
            translation: self.values[1].trim().to_string(),
            feedback: self.values[2].trim().to_string(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.state {
            SectionState::NoSection => self.preamble.push_str(text),
            SectionState::Closed => {}
            open => {
                if let Some(section) = open.section() {
                    self.values[index(section)].push_str(text);
                }
            }
        }
    }

    fn transition(&mut self, marker: Marker) {
        self.saw_marker = true;
        match (self.state, marker) {
            (_, Marker::Open(section)) => {
                self.state = SectionState::entering(section);
            }
            (SectionState::NoSection, Marker::Close(section)) => {
                // The model skipped the opening tag: everything so far was
                // this section's content.
                let preamble = std::mem::take(&mut self.preamble);
                self.values[index(section)].push_str(&preamble);
                self.state = SectionState::Closed;
            }
            (state, Marker::Close(section)) => {
                if state.section() == Some(section) {
                    self.state = SectionState::Closed;
                } else {
                    tracing::trace!(?state, ?section, "Ignoring mismatched closing tag");
                }
            }
        }
    }

    fn changed_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        for section in Section::ALL {
            let i = index(section);
            let current = self.values[i].trim();
            let changed = match &self.emitted[i] {
                Some(last) => last != current,
                None => !current.is_empty(),
            };
            if changed {
                let current = current.to_string();
                frames.push(Frame::section(section, current.clone()));
                self.emitted[i] = Some(current);
            }
        }
        frames
    }
}
