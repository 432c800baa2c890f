use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timeline entry.
///
/// `content` only changes while `streaming` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

impl Message {
    /// Creates a finalized user message stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            sender: Sender::User,
            content: content.into(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// Creates the empty placeholder an assistant reply streams into.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new_v7(),
            sender: Sender::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            streaming: true,
        }
    }

    /// Creates an already finalized message, used when hydrating history.
    pub fn finalized(
        sender: Sender,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new_v7(),
            sender,
            content: content.into(),
            created_at,
            streaming: false,
        }
    }
}

/// Immutable, ordered view of a conversation.
///
/// Cloning is cheap and a clone never observes later mutations: every reducer in
/// [`crate::reconciler`] builds a fresh backing vector.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Arc<Vec<Message>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(messages),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The in-flight assistant reply, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.streaming)
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|message| message.streaming).count()
    }

    /// True when both values share the same snapshot allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.messages, &other.messages)
    }

    /// Copies the backing vector, hands it to `edit`, and wraps the result.
    pub(crate) fn rebuild(&self, edit: impl FnOnce(&mut Vec<Message>)) -> Self {
        let mut messages = Vec::clone(&self.messages);
        edit(&mut messages);
        Self::from_messages(messages)
    }

    pub(crate) fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }
}

impl PartialEq for Timeline {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.messages == other.messages
    }
}

impl Eq for Timeline {}
