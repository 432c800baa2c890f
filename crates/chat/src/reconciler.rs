//! Folds local edits and remote chunks into a [`Timeline`].
//!
//! The free functions are pure reducers: they take a snapshot and return a new one, never
//! touching the input. [`MessageReconciler`] holds the current snapshot for a session and
//! turns reducer rejections into logged no-ops.

use crate::ids::MessageId;
use crate::message::{Message, Timeline};

/// Why a reducer refused an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileRejection {
    /// A reply is already streaming; only one may be in flight.
    AlreadyStreaming { active: MessageId },
    /// No message with this id exists in the timeline.
    UnknownMessage { id: MessageId },
    /// The message exists but is not the live streaming reply.
    NotStreaming { id: MessageId },
}

pub type ReconcileResult<T> = Result<T, ReconcileRejection>;

/// Appends `message` to the end of the timeline.
pub fn append(timeline: &Timeline, message: Message) -> Timeline {
    timeline.rebuild(|messages| messages.push(message))
}

/// Appends a streaming assistant placeholder, refusing if another reply is live.
pub fn begin_reply(timeline: &Timeline, placeholder: Message) -> ReconcileResult<Timeline> {
    if let Some(active) = timeline.streaming_message() {
        return Err(ReconcileRejection::AlreadyStreaming { active: active.id });
    }
    Ok(append(timeline, placeholder))
}

/// Concatenates `text` onto the streaming message `id`.
pub fn apply_chunk(timeline: &Timeline, id: MessageId, text: &str) -> ReconcileResult<Timeline> {
    let index = streaming_index(timeline, id)?;
    Ok(timeline.rebuild(|messages| messages[index].content.push_str(text)))
}

/// Marks `id` as no longer streaming.
///
/// Returns `Ok(None)` when the message is already final so callers can skip publishing.
pub fn finalize(timeline: &Timeline, id: MessageId) -> ReconcileResult<Option<Timeline>> {
    let Some(index) = timeline.position(id) else {
        return Err(ReconcileRejection::UnknownMessage { id });
    };
    if !timeline.messages()[index].streaming {
        return Ok(None);
    }
    Ok(Some(
        timeline.rebuild(|messages| messages[index].streaming = false),
    ))
}

fn streaming_index(timeline: &Timeline, id: MessageId) -> ReconcileResult<usize> {
    let Some(index) = timeline.position(id) else {
        return Err(ReconcileRejection::UnknownMessage { id });
    };
    if !timeline.messages()[index].streaming {
        return Err(ReconcileRejection::NotStreaming { id });
    }
    Ok(index)
}

/// Owns the current timeline snapshot of one session.
#[derive(Debug, Clone, Default)]
pub struct MessageReconciler {
    timeline: Timeline,
}

impl MessageReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(timeline: Timeline) -> Self {
        Self { timeline }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Appends a finalized user message and returns its fresh id.
    pub fn append_user_message(&mut self, content: impl Into<String>) -> MessageId {
        let message = Message::user(content);
        let id = message.id;
        self.timeline = append(&self.timeline, message);
        id
    }

    /// Appends the empty streaming placeholder for the next assistant reply.
    pub fn begin_assistant_reply(&mut self) -> ReconcileResult<MessageId> {
        let placeholder = Message::assistant_placeholder();
        let id = placeholder.id;
        self.timeline = begin_reply(&self.timeline, placeholder)?;
        Ok(id)
    }

    /// Applies one chunk; returns whether the timeline changed.
    pub fn apply_chunk(&mut self, id: MessageId, text: &str) -> bool {
        match apply_chunk(&self.timeline, id, text) {
            Ok(next) => {
                if text.is_empty() {
                    return false;
                }
                self.timeline = next;
                true
            }
            Err(rejection) => {
                tracing::warn!(
                    message_id = %id,
                    rejection = ?rejection,
                    chunk_len = text.len(),
                    "dropping chunk that does not target the streaming message"
                );
                false
            }
        }
    }

    /// Finalizes `id`; returns whether the timeline changed.
    pub fn finalize(&mut self, id: MessageId) -> bool {
        match finalize(&self.timeline, id) {
            Ok(Some(next)) => {
                self.timeline = next;
                true
            }
            Ok(None) => false,
            Err(rejection) => {
                tracing::warn!(message_id = %id, rejection = ?rejection, "cannot finalize message");
                false
            }
        }
    }

    /// Replaces the whole timeline with already finalized history.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.timeline = Timeline::from_messages(messages);
    }
}
