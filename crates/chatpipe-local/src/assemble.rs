//! Final message list for the completion model.

use chatpipe_core::{Augmentation, AugmentedPrompt, Message, MessageContent};

fn system_message(system: Option<&str>) -> Option<Message> {
    system.filter(|s| !s.is_empty()).map(Message::system)
}

/// Prompt built from an augmented text message.
pub fn augmented_prompt(
    system: Option<&str>,
    history: Vec<Message>,
    aug: &Augmentation,
) -> AugmentedPrompt {
    AugmentedPrompt {
        system_text: system.map(|s| s.to_string()),
        history,
        user_text: aug.user_text.clone(),
        retrieved_text: aug.retrieved_text.clone(),
    }
}

/// Messages for a new user turn.
///
/// Text content is combined with `aug` (when given) as `user_text + retrieved_text`.
/// Multi-part content is forwarded untouched; augmentation never applies to it.
pub fn assemble(
    system: Option<&str>,
    history: Vec<Message>,
    content: MessageContent,
    aug: Option<&Augmentation>,
) -> Vec<Message> {
    match content {
        MessageContent::Text(text) => {
            let aug = aug
                .cloned()
                .unwrap_or_else(|| Augmentation::passthrough(&text));
            augmented_prompt(system, history, &aug).into_messages()
        }
        parts @ MessageContent::Parts(_) => {
            let mut out: Vec<Message> = system_message(system).into_iter().collect();
            out.extend(history);
            out.push(Message::user(parts));
            out
        }
    }
}

/// Messages for continuing the last assistant turn: system text and history only.
pub fn continuation(system: Option<&str>, history: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = system_message(system).into_iter().collect();
    out.extend(history);
    out
}
