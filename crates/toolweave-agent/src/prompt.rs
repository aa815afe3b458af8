//! Prompt assembly.

use crate::types::{MessageContent, PromptMessage, Role};

/// The messages every round starts from: instruction, history, then the
/// query.
pub fn seed_messages(
    instruction: Option<&str>,
    history: &[PromptMessage],
    query: &str,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(instruction) = instruction.filter(|s| !s.trim().is_empty()) {
        messages.push(PromptMessage::system(instruction));
    }
    messages.extend(history.iter().cloned());
    messages.push(PromptMessage::user(query));
    messages
}

/// Build the prompt for one round.
///
/// Once the run has produced anything (`thoughts` is non-empty), multi-part
/// user messages are flattened to text so media is not re-sent every round.
pub fn organize_prompt(seed: &[PromptMessage], thoughts: &[PromptMessage]) -> Vec<PromptMessage> {
    let mut messages: Vec<PromptMessage> = seed.iter().chain(thoughts).cloned().collect();
    if !thoughts.is_empty() {
        messages.iter_mut().for_each(flatten_user_content);
    }
    messages
}

/// Replace a multi-part user message's content with text, one line per part,
/// media parts becoming `[image]` / `[file]`.
pub fn flatten_user_content(message: &mut PromptMessage) {
    if message.role != Role::User {
        return;
    }
    if let MessageContent::Parts(parts) = &message.content {
        let text = parts
            .iter()
            .map(|p| p.placeholder_text())
            .collect::<Vec<_>>()
            .join("\n");
        message.content = MessageContent::Text(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentPart;

    fn multimodal_user() -> PromptMessage {
        PromptMessage::user_parts(vec![
            ContentPart::Text {
                data: "what is in this picture?".into(),
            },
            ContentPart::Image {
                data: "data:image/png;base64,AAAA".into(),
            },
            ContentPart::File {
                data: "https://x.test/report.pdf".into(),
            },
        ])
    }

    #[test]
    fn seed_orders_instruction_history_query() {
        let history = vec![PromptMessage::user("hi"), PromptMessage::assistant("hello")];
        let seed = seed_messages(Some("be brief"), &history, "weather?");
        let roles: Vec<Role> = seed.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(seed.last().unwrap().text(), "weather?");
    }

    #[test]
    fn blank_instruction_adds_no_system_message() {
        let seed = seed_messages(Some("  "), &[], "q");
        assert_eq!(seed.len(), 1);
        assert_eq!(seed_messages(None, &[], "q").len(), 1);
    }

    #[test]
    fn first_round_keeps_media() {
        let seed = vec![multimodal_user()];
        let prompt = organize_prompt(&seed, &[]);
        assert!(matches!(prompt[0].content, MessageContent::Parts(_)));
    }

    #[test]
    fn later_rounds_flatten_media_to_placeholders() {
        let seed = vec![multimodal_user()];
        let thoughts = vec![PromptMessage::assistant("looking")];
        let prompt = organize_prompt(&seed, &thoughts);

        assert_eq!(
            prompt[0].content,
            MessageContent::Text("what is in this picture?\n[image]\n[file]".into())
        );
        assert_eq!(prompt.len(), 2);
        // The seed itself is untouched.
        assert!(matches!(seed[0].content, MessageContent::Parts(_)));
    }

    #[test]
    fn flattening_leaves_other_roles_alone() {
        let mut m = PromptMessage::assistant("x");
        m.content = MessageContent::Parts(vec![ContentPart::Image { data: "u".into() }]);
        let before = m.clone();
        flatten_user_content(&mut m);
        assert_eq!(m, before);
    }
}
