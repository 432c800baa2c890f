//! Contracts for the request/response collaborators around the streaming core.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackendResult;
use crate::ids::ChatId;
use crate::message::{Message, Sender};
use crate::summary::ChatSummary;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Result of a successful login or signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    #[serde(default, alias = "userProfile")]
    pub user: UserProfile,
}

/// Reply body of the new-chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatResponse {
    #[serde(alias = "id")]
    pub chat_id: ChatId,
}

/// One persisted message as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub sender: Sender,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now", alias = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl HistoryMessage {
    /// Converts into a finalized timeline entry with a fresh client id.
    pub fn into_message(self) -> Message {
        Message::finalized(self.sender, self.content, self.created_at)
    }
}

/// Full chat as returned by the load-by-id endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    #[serde(alias = "id")]
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

pub trait ChatBackend: Send + Sync {
    fn login_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthSession>>;

    fn signup_user<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthSession>>;

    fn start_new_chat(&self) -> BoxFuture<'_, BackendResult<ChatId>>;

    fn load_chat_history(&self) -> BoxFuture<'_, BackendResult<Vec<ChatSummary>>>;

    fn load_chat_by_id<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, BackendResult<ChatRecord>>;

    fn update_chat_title<'a>(
        &'a self,
        chat_id: &'a ChatId,
        title: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>>;
}
