//! Session conversation history sent to the chat collaborator.

use crate::pipeline::messages::{ChatMessage, Role};

/// Ordered messages for one session.
///
/// Messages are only appended, except that the trailing assistant reply can be
/// retracted so the same user turn is answered again.
#[derive(Debug, Clone, Default)]
pub struct ConversationTranscript {
    messages: Vec<ChatMessage>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the new length.
    pub fn append(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The user message awaiting a reply: the last message, when it is from the user.
    pub fn pending_user(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|m| m.role == Role::User)
    }

    /// Remove the last message if it is an assistant reply.
    pub fn retract_reply(&mut self) -> Option<ChatMessage> {
        if self.messages.last()?.role == Role::Assistant {
            self.messages.pop()
        } else {
            None
        }
    }
}
