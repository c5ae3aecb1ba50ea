//! Prompt Construction
//!
//! Builds generation requests for the roleplay partner. The instructions fix
//! the section markers the multiplexer recognizes:
//!
//! ```text
//! <reply>…</reply>
//! <translation>…</translation>
//! <feedback>…</feedback>
//! ```

use crate::backend::LlmRequest;
use crate::session::{Session, SessionSettings};

/// Instructions shared by every roleplay turn
fn system_prompt(settings: &SessionSettings) -> String {
    format!(
        "You are a friendly language learning partner playing a role in a conversation. \
The user is learning {learning} and speaks {native} as their native language. \
The situation is: {situation}.\n\n\
Stay in character and answer in {learning} only inside the reply. \
Structure every answer in exactly three tagged sections and write nothing outside them:\n\
<reply>your in-character answer in {learning}</reply>\n\
<translation>the same answer translated into {native}</translation>\n\
<feedback>short, kind feedback in {native} on the user's last message</feedback>",
        learning = settings.learning_language,
        native = settings.native_language,
        situation = settings.situation,
    )
}

/// Request for the next assistant turn
///
/// `session` must already contain the user's latest message as the last
/// history entry.
#[must_use]
pub fn turn_request(session: &Session, model: &str, max_context_messages: usize) -> LlmRequest {
    LlmRequest::new("Assistant:", model)
        .with_system(system_prompt(&session.settings))
        .with_context(session.build_context(max_context_messages))
}

/// Request for an opening line before the user has said anything
#[must_use]
pub fn greeting_request(settings: &SessionSettings) -> LlmRequest {
    LlmRequest::new(
        "Open the conversation with one or two short sentences. \
Leave the feedback section empty.\nAssistant:",
        settings.model.clone(),
    )
    .with_system(system_prompt(settings))
    .with_stream(false)
}

/// Request for a one-sentence roleplay scenario
#[must_use]
pub fn situation_request(learning_language: &str, model: &str) -> LlmRequest {
    LlmRequest::new(
        format!(
            "Suggest one everyday roleplay situation for someone practising {learning_language}. \
Answer with a single short sentence in English, without quotes or preamble."
        ),
        model,
    )
    .with_stream(false)
    .with_temperature(1.0)
    .with_max_tokens(60)
}
