use super::message::{Message, Role};

/// How many messages a transcript view shows at most
pub const MAX_DISPLAYED_MESSAGES: usize = 100;

/// The ordered, append-only message history of one chat session.
///
/// Only the trailing assistant message may change after it has been pushed, and only
/// through [`Conversation::append_to_placeholder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent messages, capped at [`MAX_DISPLAYED_MESSAGES`]
    pub fn visible(&self) -> &[Message] {
        let start = self.messages.len().saturating_sub(MAX_DISPLAYED_MESSAGES);
        &self.messages[start..]
    }

    /// Whether [`Conversation::visible`] hides older messages
    pub fn is_display_truncated(&self) -> bool {
        self.messages.len() > MAX_DISPLAYED_MESSAGES
    }

    /// Append streamed text to the trailing assistant message.
    ///
    /// Returns false (and changes nothing) when the last message is not an assistant message.
    pub fn append_to_placeholder(&mut self, text: &str) -> bool {
        match self.messages.last_mut() {
            Some(message) if message.role == Role::Assistant => {
                message.content.push_str(text);
                true
            }
            _ => false,
        }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
