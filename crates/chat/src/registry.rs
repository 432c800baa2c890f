//! Index of known chats: listing rows plus the sessions that have been opened.

use std::collections::HashMap;

use snafu::{OptionExt, ResultExt};

use crate::error::{BackendSnafu, ChatNotFoundSnafu, RegistryResult, SessionBusySnafu};
use crate::ids::ChatId;
use crate::session::{ChatSession, SessionContext, SessionEvent};
use crate::summary::{ChatSummary, DEFAULT_CHAT_TITLE, SummaryPatch};

/// Sole owner of every [`ChatSession`] and of the summary list.
pub struct ChatRegistry {
    context: SessionContext,
    sessions: HashMap<ChatId, ChatSession>,
    summaries: Vec<ChatSummary>,
}

impl ChatRegistry {
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            sessions: HashMap::new(),
            summaries: Vec::new(),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Returns the cached session, creating an empty idle one on first access.
    pub fn get_or_create(&mut self, chat_id: &ChatId) -> &mut ChatSession {
        let title = self
            .summary(chat_id)
            .map(|summary| summary.title.clone())
            .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
        let context = &self.context;

        self.sessions.entry(chat_id.clone()).or_insert_with(|| {
            tracing::debug!(chat_id = %chat_id, "creating chat session");
            ChatSession::new(chat_id.clone(), title, context.clone())
        })
    }

    pub fn get(&self, chat_id: &ChatId) -> RegistryResult<&ChatSession> {
        self.sessions.get(chat_id).context(ChatNotFoundSnafu {
            stage: "get-session",
            chat_id: chat_id.clone(),
        })
    }

    pub fn get_mut(&mut self, chat_id: &ChatId) -> RegistryResult<&mut ChatSession> {
        self.sessions.get_mut(chat_id).context(ChatNotFoundSnafu {
            stage: "get-session",
            chat_id: chat_id.clone(),
        })
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.sessions.contains_key(chat_id)
    }

    pub fn summary(&self, chat_id: &ChatId) -> Option<&ChatSummary> {
        self.summaries
            .iter()
            .find(|summary| &summary.chat_id == chat_id)
    }

    /// Asks the backend for a fresh chat id and registers a "New Chat" placeholder.
    pub async fn allocate_new_chat(&mut self) -> RegistryResult<ChatId> {
        let chat_id = self
            .context
            .backend
            .start_new_chat()
            .await
            .context(BackendSnafu {
                stage: "allocate-chat",
            })?;

        if self.summary(&chat_id).is_none() {
            self.summaries.push(ChatSummary::placeholder(chat_id.clone()));
        }
        tracing::info!(chat_id = %chat_id, "allocated new chat");
        Ok(chat_id)
    }

    /// Merges `patch` into the matching summary. Unknown ids are ignored.
    pub fn update_summary(&mut self, chat_id: &ChatId, patch: SummaryPatch) {
        if patch.is_empty() {
            return;
        }
        match self
            .summaries
            .iter_mut()
            .find(|summary| &summary.chat_id == chat_id)
        {
            Some(summary) => summary.apply(patch),
            None => tracing::debug!(chat_id = %chat_id, "no summary to update"),
        }
    }

    /// Summaries whose title contains `filter`, ignoring case, in insertion order.
    ///
    /// The iterator can be cloned to restart it.
    pub fn list(&self, filter: &str) -> impl Iterator<Item = &ChatSummary> + Clone + '_ {
        let needle = filter.trim().to_lowercase();
        self.summaries
            .iter()
            .filter(move |summary| summary.title_matches(&needle))
    }

    /// Replaces the summary list with the backend's chat history.
    pub async fn load_history(&mut self) -> RegistryResult<usize> {
        let history = self
            .context
            .backend
            .load_chat_history()
            .await
            .context(BackendSnafu {
                stage: "load-history",
            })?;

        let mut seen = std::collections::HashSet::new();
        self.summaries = history
            .into_iter()
            .filter(|summary| seen.insert(summary.chat_id.clone()))
            .collect();
        tracing::info!(chats = self.summaries.len(), "loaded chat history");
        Ok(self.summaries.len())
    }

    /// Returns the session for `chat_id`, hydrating an empty timeline from the backend.
    pub async fn open_chat(&mut self, chat_id: &ChatId) -> RegistryResult<&mut ChatSession> {
        let needs_history = {
            let session = self.get_or_create(chat_id);
            if session.status().is_busy() {
                return SessionBusySnafu {
                    stage: "open-chat",
                    chat_id: chat_id.clone(),
                }
                .fail();
            }
            session.timeline().is_empty()
        };

        if self.summary(chat_id).is_none() {
            self.summaries.push(ChatSummary::placeholder(chat_id.clone()));
        }

        if needs_history {
            let record = self
                .context
                .backend
                .load_chat_by_id(chat_id)
                .await
                .context(BackendSnafu {
                    stage: "load-chat",
                })?;

            let messages = record
                .messages
                .into_iter()
                .map(|message| message.into_message())
                .collect::<Vec<_>>();
            let title = Some(record.title).filter(|title| !title.trim().is_empty());
            let count = messages.len();

            if let Some(title) = title.clone() {
                self.update_summary(chat_id, SummaryPatch::title(title));
            }
            let session = self.get_mut(chat_id)?;
            if !session.hydrate(title, messages) {
                return SessionBusySnafu {
                    stage: "hydrate-chat",
                    chat_id: chat_id.clone(),
                }
                .fail();
            }
            tracing::debug!(chat_id = %chat_id, messages = count, "hydrated chat");
        }

        self.get_mut(chat_id)
    }

    /// Renames a chat locally and in the background on the backend.
    ///
    /// Returns `Ok(false)` for a blank title.
    pub fn rename_chat(&mut self, chat_id: &ChatId, title: &str) -> RegistryResult<bool> {
        let Some(title) = self.get_mut(chat_id)?.update_title(title) else {
            return Ok(false);
        };
        self.update_summary(chat_id, SummaryPatch::title(title));
        Ok(true)
    }

    /// Applies the next transport event of `chat_id` and folds summary changes in.
    ///
    /// `Ok(None)` means the session has no live stream.
    pub async fn drive(&mut self, chat_id: &ChatId) -> RegistryResult<Option<SessionEvent>> {
        let event = self.get_mut(chat_id)?.next_event().await;

        if let Some(SessionEvent::Completed { summary, .. }) = &event {
            self.update_summary(chat_id, summary.clone());
        }
        Ok(event)
    }

    /// Disposes the session, closing its transport. The summary row stays.
    pub fn evict(&mut self, chat_id: &ChatId) -> bool {
        match self.sessions.remove(chat_id) {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }
}
