use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ChatId;

/// Title given to a freshly allocated chat until a reply names it.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

const ELLIPSIS: &str = "...";

/// Denormalized listing row for one chat. Allowed to lag the backend copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(alias = "id")]
    pub chat_id: ChatId,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default, alias = "lastMessage", alias = "preview")]
    pub last_message_preview: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatSummary {
    /// Placeholder row registered when a chat is allocated.
    pub fn placeholder(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            title: DEFAULT_CHAT_TITLE.to_string(),
            last_message_preview: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, patch: SummaryPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(preview) = patch.last_message_preview {
            self.last_message_preview = preview;
        }
    }

    /// Case-insensitive substring match on the title; `needle` must already be lowercase.
    pub(crate) fn title_matches(&self, needle: &str) -> bool {
        needle.is_empty() || self.title.to_lowercase().contains(needle)
    }
}

/// Partial update for a [`ChatSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SummaryPatch {
    pub title: Option<String>,
    pub last_message_preview: Option<String>,
}

impl SummaryPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.last_message_preview = Some(preview.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.last_message_preview.is_none()
    }
}

/// Derives a chat title from the first assistant reply.
///
/// Keeps the first `word_limit` whitespace-delimited tokens and always appends an
/// ellipsis, so "Hi there" becomes "Hi there...". Returns `None` for a blank reply.
pub fn derive_title(reply: &str, word_limit: usize) -> Option<String> {
    let words = reply
        .split_whitespace()
        .take(word_limit.max(1))
        .collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }
    Some(format!("{}{ELLIPSIS}", words.join(" ")))
}

/// Collapses whitespace and truncates to `max_chars` characters for list display.
pub fn derive_preview(content: &str, max_chars: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let truncated = collapsed.chars().take(max_chars).collect::<String>();
    format!("{}{ELLIPSIS}", truncated.trim_end())
}

fn default_title() -> String {
    DEFAULT_CHAT_TITLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reply_keeps_all_words_and_gains_ellipsis() {
        assert_eq!(derive_title("Hi there", 5).as_deref(), Some("Hi there..."));
    }

    #[test]
    fn long_reply_is_cut_to_word_limit() {
        let reply = "Rust is a systems language with strong guarantees";
        assert_eq!(
            derive_title(reply, 5).as_deref(),
            Some("Rust is a systems language...")
        );
    }

    #[test]
    fn multi_paragraph_reply_splits_on_any_whitespace() {
        let reply = "First line.\n\nSecond\tparagraph here and more";
        assert_eq!(
            derive_title(reply, 5).as_deref(),
            Some("First line. Second paragraph here...")
        );
    }

    #[test]
    fn blank_reply_yields_no_title() {
        assert_eq!(derive_title("   \n", 5), None);
        assert_eq!(derive_title("", 5), None);
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(derive_preview("short  reply\n", 80), "short reply");
        assert_eq!(derive_preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut summary = ChatSummary::placeholder(ChatId::new("c1"));
        summary.apply(SummaryPatch::default().with_preview("latest"));
        assert_eq!(summary.title, DEFAULT_CHAT_TITLE);
        assert_eq!(summary.last_message_preview, "latest");

        summary.apply(SummaryPatch::title("Renamed"));
        assert_eq!(summary.title, "Renamed");
        assert_eq!(summary.last_message_preview, "latest");
    }

    #[test]
    fn summary_decodes_original_wire_shape() {
        let summary: ChatSummary = serde_json::from_str(
            r#"{"id":"abc","title":"Trip plans","createdAt":"2024-05-01T10:00:00Z","messages":[]}"#,
        )
        .expect("summary should decode");

        assert_eq!(summary.chat_id, ChatId::new("abc"));
        assert_eq!(summary.title, "Trip plans");
        assert_eq!(summary.last_message_preview, "");
        assert_eq!(summary.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
