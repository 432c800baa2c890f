//! State machine for one conversation.
//!
//! ```text
//! idle|errored --send--> sending --opened--> streaming --closed--> idle
//!                           |                    '------failed--> errored
//!                           '--no credential--> errored
//! any --close_session--> idle
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::ChatBackend;
use crate::config::SummarySettings;
use crate::credential::CredentialSource;
use crate::ids::{ChatId, MessageId, StreamGeneration};
use crate::message::{Message, Timeline};
use crate::reconciler::MessageReconciler;
use crate::summary::{SummaryPatch, derive_preview, derive_title};
use crate::transport::{
    PushConnector, ReconnectPolicy, StreamTransport, TransportEvent, TransportEventKind,
    TransportFailure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Sending,
    Streaming,
    Errored,
}

impl SessionStatus {
    /// True while a send is in flight and new sends are refused.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

/// What subscribers see after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub chat_id: ChatId,
    pub title: String,
    pub timeline: Timeline,
    pub status: SessionStatus,
    pub last_error: Option<TransportFailure>,
    pub typing: bool,
}

impl SessionSnapshot {
    /// Banner text for the current error, if any.
    pub fn error_message(&self) -> Option<String> {
        self.last_error.as_ref().map(TransportFailure::user_message)
    }
}

/// Collaborators shared by every session of a registry.
#[derive(Clone)]
pub struct SessionContext {
    pub connector: Arc<dyn PushConnector>,
    pub credentials: Arc<dyn CredentialSource>,
    pub backend: Arc<dyn ChatBackend>,
    pub policy: ReconnectPolicy,
    pub summary: SummarySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyContent,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Silently ignored input; nothing changed.
    Rejected(SendRejection),
    /// The stream is open and the reply placeholder is in the timeline.
    Streaming {
        user_message_id: MessageId,
        assistant_message_id: MessageId,
        generation: StreamGeneration,
    },
    /// The stream could not be opened; the user message stays in the timeline.
    Failed {
        user_message_id: MessageId,
        failure: TransportFailure,
    },
}

/// A change the session applied for one transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Chunk {
        message_id: MessageId,
        text: String,
    },
    Typing(bool),
    Completed {
        message_id: MessageId,
        summary: SummaryPatch,
    },
    Failed {
        message_id: MessageId,
        failure: TransportFailure,
    },
}

struct ActiveStream {
    transport: StreamTransport,
    assistant_message_id: MessageId,
}

pub struct ChatSession {
    chat_id: ChatId,
    title: String,
    reconciler: MessageReconciler,
    status: SessionStatus,
    last_error: Option<TransportFailure>,
    typing: bool,
    context: SessionContext,
    active: Option<ActiveStream>,
    generation: StreamGeneration,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ChatSession {
    pub fn new(chat_id: ChatId, title: impl Into<String>, context: SessionContext) -> Self {
        let title = title.into();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            chat_id: chat_id.clone(),
            title: title.clone(),
            timeline: Timeline::new(),
            status: SessionStatus::Idle,
            last_error: None,
            typing: false,
        });

        Self {
            chat_id,
            title,
            reconciler: MessageReconciler::new(),
            status: SessionStatus::Idle,
            last_error: None,
            typing: false,
            context,
            active: None,
            generation: StreamGeneration::new(0),
            snapshot_tx,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn timeline(&self) -> &Timeline {
        self.reconciler.timeline()
    }

    pub fn last_error(&self) -> Option<&TransportFailure> {
        self.last_error.as_ref()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Generation of the live transport, if one is open.
    pub fn active_generation(&self) -> Option<StreamGeneration> {
        self.active
            .as_ref()
            .map(|active| active.transport.generation())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            chat_id: self.chat_id.clone(),
            title: self.title.clone(),
            timeline: self.reconciler.timeline().clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            typing: self.typing,
        }
    }

    /// Receiver whose value is always the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Sends user input and opens the reply stream.
    ///
    /// Outside a tokio runtime the send fails with `stream-interrupted`.
    pub fn send_message(&mut self, content: &str) -> SendOutcome {
        if content.trim().is_empty() {
            tracing::debug!(chat_id = %self.chat_id, "ignoring empty message");
            return SendOutcome::Rejected(SendRejection::EmptyContent);
        }
        if self.status.is_busy() {
            tracing::debug!(
                chat_id = %self.chat_id,
                status = ?self.status,
                "ignoring send while another is in flight"
            );
            return SendOutcome::Rejected(SendRejection::Busy);
        }

        self.status = SessionStatus::Sending;
        self.last_error = None;
        self.typing = false;
        let user_message_id = self.reconciler.append_user_message(content);
        self.publish();

        self.generation = self.generation.next();
        let opened = StreamTransport::open(
            self.chat_id.clone(),
            content,
            self.generation,
            self.context.connector.clone(),
            self.context.credentials.as_ref(),
            self.context.policy,
        );

        let transport = match opened {
            Ok(transport) => transport,
            Err(error) => {
                tracing::warn!(chat_id = %self.chat_id, error = %error, "cannot open reply stream");
                let failure = TransportFailure::from_error(&error);
                self.status = SessionStatus::Errored;
                self.last_error = Some(failure.clone());
                self.publish();
                return SendOutcome::Failed {
                    user_message_id,
                    failure,
                };
            }
        };

        let assistant_message_id = match self.reconciler.begin_assistant_reply() {
            Ok(id) => id,
            Err(rejection) => {
                // Only reachable if a reply outlived its transport.
                tracing::error!(
                    chat_id = %self.chat_id,
                    rejection = ?rejection,
                    "refusing to start a second streaming reply"
                );
                self.status = SessionStatus::Idle;
                self.publish();
                return SendOutcome::Rejected(SendRejection::Busy);
            }
        };

        let generation = transport.generation();
        self.active = Some(ActiveStream {
            transport,
            assistant_message_id,
        });
        self.status = SessionStatus::Streaming;
        self.publish();

        tracing::debug!(
            chat_id = %self.chat_id,
            generation = %generation,
            assistant_message_id = %assistant_message_id,
            "streaming reply"
        );

        SendOutcome::Streaming {
            user_message_id,
            assistant_message_id,
            generation,
        }
    }

    /// Waits for the next transport event and applies it.
    ///
    /// Returns `None` once no stream is active. Events that change nothing are skipped.
    pub(crate) async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let active = self.active.as_mut()?;
            let generation = active.transport.generation();
            let event = match active.transport.recv().await {
                Some(event) => event,
                None => TransportEvent {
                    generation,
                    kind: TransportEventKind::Failed(TransportFailure::Interrupted),
                },
            };

            if let Some(applied) = self.handle_transport_event(event) {
                return Some(applied);
            }
        }
    }

    /// Applies one transport event if it belongs to the live generation.
    pub(crate) fn handle_transport_event(&mut self, event: TransportEvent) -> Option<SessionEvent> {
        let Some(active) = self.active.as_ref() else {
            tracing::debug!(
                chat_id = %self.chat_id,
                generation = %event.generation,
                "discarding event with no live stream"
            );
            return None;
        };
        if event.generation != active.transport.generation() {
            tracing::debug!(
                chat_id = %self.chat_id,
                generation = %event.generation,
                live_generation = %active.transport.generation(),
                "discarding event from superseded stream"
            );
            return None;
        }

        let message_id = active.assistant_message_id;
        match event.kind {
            TransportEventKind::Chunk(text) => {
                if !self.reconciler.apply_chunk(message_id, &text) {
                    return None;
                }
                self.publish();
                Some(SessionEvent::Chunk { message_id, text })
            }
            TransportEventKind::TypingStart => self.set_typing(true),
            TransportEventKind::TypingEnd => self.set_typing(false),
            TransportEventKind::Closed => Some(self.complete(message_id)),
            TransportEventKind::Failed(failure) => Some(self.fail(message_id, failure)),
        }
    }

    fn set_typing(&mut self, typing: bool) -> Option<SessionEvent> {
        if self.typing == typing {
            return None;
        }
        self.typing = typing;
        self.publish();
        Some(SessionEvent::Typing(typing))
    }

    fn complete(&mut self, message_id: MessageId) -> SessionEvent {
        self.active = None;
        self.reconciler.finalize(message_id);
        self.status = SessionStatus::Idle;
        self.typing = false;

        let reply = self
            .reconciler
            .timeline()
            .get(message_id)
            .map(|message| message.content.clone())
            .unwrap_or_default();

        let mut summary = SummaryPatch::default();
        if !reply.trim().is_empty() {
            summary.last_message_preview =
                Some(derive_preview(&reply, self.context.summary.preview_chars));
        }
        // First exchange: just the user message and this reply.
        if self.reconciler.timeline().len() <= 2
            && let Some(title) = derive_title(&reply, self.context.summary.title_word_limit)
        {
            tracing::info!(chat_id = %self.chat_id, title = %title, "derived chat title");
            self.title = title.clone();
            summary.title = Some(title);
        }

        self.publish();
        SessionEvent::Completed {
            message_id,
            summary,
        }
    }

    fn fail(&mut self, message_id: MessageId, failure: TransportFailure) -> SessionEvent {
        self.active = None;
        self.reconciler.finalize(message_id);
        self.status = SessionStatus::Errored;
        self.typing = false;
        tracing::warn!(
            chat_id = %self.chat_id,
            reason = failure.code(),
            "reply stream failed, keeping partial content"
        );
        self.last_error = Some(failure.clone());
        self.publish();
        SessionEvent::Failed {
            message_id,
            failure,
        }
    }

    /// Tears down the live stream (navigation away) and returns to idle.
    ///
    /// The timeline is kept; a partial reply is finalized as received.
    pub fn close_session(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.transport.close();
            self.reconciler.finalize(active.assistant_message_id);
            tracing::debug!(chat_id = %self.chat_id, "closed session with live stream");
        }
        self.status = SessionStatus::Idle;
        self.last_error = None;
        self.typing = false;
        self.publish();
    }

    /// Local rename plus a fire-and-forget backend notification.
    ///
    /// Blank titles are ignored. Returns the accepted title.
    pub fn update_title(&mut self, title: &str) -> Option<String> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        self.title = title.to_string();
        self.publish();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let backend = self.context.backend.clone();
                let chat_id = self.chat_id.clone();
                let remote_title = self.title.clone();
                runtime.spawn(async move {
                    if let Err(error) = backend.update_chat_title(&chat_id, &remote_title).await {
                        tracing::warn!(
                            chat_id = %chat_id,
                            error = %error,
                            "failed to sync chat title to backend"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::debug!(chat_id = %self.chat_id, "no runtime, skipping remote title sync");
            }
        }

        Some(self.title.clone())
    }

    /// Fills an empty timeline with backend history.
    ///
    /// Refused while a send is in flight or once the timeline has any message.
    pub fn hydrate(&mut self, title: Option<String>, messages: Vec<Message>) -> bool {
        if self.status.is_busy() || !self.reconciler.timeline().is_empty() {
            tracing::debug!(
                chat_id = %self.chat_id,
                status = ?self.status,
                messages = self.reconciler.timeline().len(),
                "refusing to hydrate a live timeline"
            );
            return false;
        }
        if let Some(title) = title.filter(|title| !title.trim().is_empty()) {
            self.title = title;
        }
        self.reconciler.replace_history(messages);
        self.publish();
        true
    }

    /// Closes any live stream and drops the session; subscribers see the channel close.
    pub fn dispose(mut self) {
        self.close_session();
        tracing::debug!(chat_id = %self.chat_id, "disposed session");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::tests::MemoryBackend;
    use crate::credential::TokenStore;
    use crate::message::Sender;
    use crate::transport::tests::{Attempt, ScriptedConnector, chunk, signed_in};
    use crate::transport::{RawFrame, TYPING_END_EVENT, TYPING_START_EVENT};

    pub(crate) fn context(
        connector: Arc<ScriptedConnector>,
        credentials: TokenStore,
        backend: Arc<MemoryBackend>,
    ) -> SessionContext {
        SessionContext {
            connector,
            credentials: Arc::new(credentials),
            backend,
            policy: ReconnectPolicy::default(),
            summary: SummarySettings::default(),
        }
    }

    fn session(connector: Arc<ScriptedConnector>) -> (ChatSession, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::default());
        let session = ChatSession::new(
            ChatId::new("chat-1"),
            "New Chat",
            context(connector, signed_in(), backend.clone()),
        );
        (session, backend)
    }

    async fn run_to_end(session: &mut ChatSession) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            assert!(session.timeline().streaming_count() <= 1);
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn hello_scenario_streams_and_derives_title() {
        let connector = ScriptedConnector::new([Attempt::Complete(vec![
            chunk("Hi"),
            chunk(" there"),
        ])]);
        let (mut session, _backend) = session(connector);

        let outcome = session.send_message("Hello");
        let SendOutcome::Streaming {
            assistant_message_id,
            ..
        } = outcome
        else {
            panic!("expected streaming outcome, got {outcome:?}");
        };

        let messages = session.timeline().messages().to_vec();
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            (messages[0].sender, messages[0].content.as_str(), messages[0].streaming),
            (Sender::User, "Hello", false)
        );
        assert_eq!(
            (messages[1].sender, messages[1].content.as_str(), messages[1].streaming),
            (Sender::Assistant, "", true)
        );

        let events = run_to_end(&mut session).await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            SessionEvent::Completed {
                message_id: assistant_message_id,
                summary: SummaryPatch::title("Hi there...").with_preview("Hi there"),
            }
        );

        let reply = session.timeline().get(assistant_message_id).expect("reply");
        assert_eq!(reply.content, "Hi there");
        assert!(!reply.streaming);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.title(), "Hi there...");
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let (mut session, _backend) = session(ScriptedConnector::new([]));

        assert_eq!(
            session.send_message("   \n\t"),
            SendOutcome::Rejected(SendRejection::EmptyContent)
        );
        assert!(session.timeline().is_empty());
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn send_while_streaming_is_a_no_op() {
        let connector = ScriptedConnector::new([Attempt::Hang(vec![])]);
        let (mut session, _backend) = session(connector.clone());

        session.send_message("first");
        let before = session.timeline().clone();

        assert_eq!(
            session.send_message("second"),
            SendOutcome::Rejected(SendRejection::Busy)
        );
        assert!(session.timeline().ptr_eq(&before));
        assert_eq!(session.timeline().len(), 2);
    }

    #[tokio::test]
    async fn missing_credential_errors_but_keeps_user_message() {
        let backend = Arc::new(MemoryBackend::default());
        let connector = ScriptedConnector::new([]);
        let mut session = ChatSession::new(
            ChatId::new("chat-1"),
            "New Chat",
            context(connector.clone(), TokenStore::new(), backend),
        );

        let outcome = session.send_message("Hello");
        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                failure: TransportFailure::AuthenticationRequired,
                ..
            }
        ));
        assert_eq!(session.status(), SessionStatus::Errored);
        assert_eq!(
            session.last_error().map(TransportFailure::code),
            Some("authentication-required")
        );

        let messages = session.timeline().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(session.next_event().await, None);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_keep_partial_reply_and_allow_retry() {
        let connector = ScriptedConnector::new([
            Attempt::Drop(vec![chunk("Partial ans")]),
            Attempt::Refuse,
            Attempt::Refuse,
            Attempt::Refuse,
            Attempt::Complete(vec![chunk("Recovered")]),
        ]);
        let (mut session, _backend) = session(connector);
        let mut snapshots = session.subscribe();

        session.send_message("Explain");
        let events = run_to_end(&mut session).await;
        let Some(SessionEvent::Failed {
            message_id,
            failure,
        }) = events.last().cloned()
        else {
            panic!("expected failure, got {events:?}");
        };

        assert_eq!(failure, TransportFailure::MaxReconnectExceeded { attempts: 3 });
        assert_eq!(session.status(), SessionStatus::Errored);
        let partial = session.timeline().get(message_id).expect("partial reply");
        assert_eq!(partial.content, "Partial ans");
        assert!(!partial.streaming);

        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.status, SessionStatus::Errored);
        assert!(snapshot.error_message().is_some());

        // A retry from the errored state clears the error and streams again.
        assert!(matches!(
            session.send_message("Try again"),
            SendOutcome::Streaming { .. }
        ));
        assert_eq!(session.last_error(), None);
        run_to_end(&mut session).await;

        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.timeline().len(), 4);
        assert_eq!(
            session.timeline().last().map(|m| m.content.as_str()),
            Some("Recovered")
        );
    }

    #[tokio::test]
    async fn events_after_close_never_touch_the_timeline() {
        let connector = ScriptedConnector::new([
            Attempt::Hang(vec![chunk("early")]),
            Attempt::Hang(vec![]),
        ]);
        let (mut session, _backend) = session(connector);

        let SendOutcome::Streaming {
            generation: stale, ..
        } = session.send_message("one")
        else {
            panic!("first send should stream");
        };
        session.next_event().await;
        session.close_session();
        let after_close = session.timeline().clone();

        let late = TransportEvent {
            generation: stale,
            kind: TransportEventKind::Chunk("late".to_string()),
        };
        assert_eq!(session.handle_transport_event(late.clone()), None);
        assert!(session.timeline().ptr_eq(&after_close));
        assert_eq!(session.status(), SessionStatus::Idle);

        // A newer stream must not accept the superseded generation either.
        session.send_message("two");
        let live = session.active_generation().expect("second stream live");
        assert_ne!(live, stale);
        let before = session.timeline().clone();
        assert_eq!(session.handle_transport_event(late), None);
        assert_eq!(
            session.handle_transport_event(TransportEvent {
                generation: stale,
                kind: TransportEventKind::Closed,
            }),
            None
        );
        assert!(session.timeline().ptr_eq(&before));
        assert_eq!(session.status(), SessionStatus::Streaming);
    }

    #[tokio::test]
    async fn close_session_finalizes_partial_reply() {
        let connector = ScriptedConnector::new([Attempt::Hang(vec![chunk("half")])]);
        let (mut session, _backend) = session(connector);

        session.send_message("question");
        session.next_event().await;
        session.close_session();
        session.close_session();

        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.timeline().len(), 2);
        assert_eq!(session.timeline().streaming_count(), 0);
        assert_eq!(
            session.timeline().last().map(|m| m.content.as_str()),
            Some("half")
        );
        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn typing_signals_reach_subscribers() {
        let connector = ScriptedConnector::new([Attempt::Complete(vec![
            RawFrame::named(TYPING_START_EVENT, ""),
            RawFrame::named(TYPING_START_EVENT, ""),
            chunk("ok"),
            RawFrame::named(TYPING_END_EVENT, ""),
        ])]);
        let (mut session, _backend) = session(connector);
        let snapshots = session.subscribe();

        session.send_message("hi");
        assert_eq!(session.next_event().await, Some(SessionEvent::Typing(true)));
        assert!(snapshots.borrow().typing);

        // The duplicate start is swallowed; the chunk comes next.
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Chunk { .. })
        ));
        assert_eq!(session.next_event().await, Some(SessionEvent::Typing(false)));
        assert!(!snapshots.borrow().typing);
    }

    #[tokio::test]
    async fn later_exchanges_do_not_retitle() {
        let connector = ScriptedConnector::new([
            Attempt::Complete(vec![chunk("First answer")]),
            Attempt::Complete(vec![chunk("Second answer entirely different")]),
        ]);
        let (mut session, _backend) = session(connector);

        session.send_message("one");
        run_to_end(&mut session).await;
        assert_eq!(session.title(), "First answer...");

        session.send_message("two");
        let events = run_to_end(&mut session).await;
        let Some(SessionEvent::Completed { summary, .. }) = events.last() else {
            panic!("expected completion");
        };
        assert_eq!(summary.title, None);
        assert_eq!(
            summary.last_message_preview.as_deref(),
            Some("Second answer entirely different")
        );
        assert_eq!(session.title(), "First answer...");
    }

    #[tokio::test]
    async fn empty_reply_leaves_title_alone() {
        let connector = ScriptedConnector::new([Attempt::Complete(vec![])]);
        let (mut session, _backend) = session(connector);

        session.send_message("hello?");
        let events = run_to_end(&mut session).await;

        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Completed { summary, .. }] if summary.is_empty()
        ));
        assert_eq!(session.title(), "New Chat");
    }

    #[tokio::test]
    async fn update_title_is_local_first_and_syncs_in_background() {
        let (mut session, backend) = session(ScriptedConnector::new([]));

        assert_eq!(session.update_title("   "), None);
        assert_eq!(session.update_title("  Trip plans "), Some("Trip plans".to_string()));
        assert_eq!(session.title(), "Trip plans");
        assert_eq!(session.subscribe().borrow().title, "Trip plans");

        tokio::time::sleep(Duration::from_millis(1)).await;
        let renames = backend.renames.lock().expect("renames lock").clone();
        assert_eq!(renames, vec![(ChatId::new("chat-1"), "Trip plans".to_string())]);
    }

    #[tokio::test]
    async fn hydrate_is_refused_while_streaming() {
        let connector = ScriptedConnector::new([Attempt::Hang(vec![])]);
        let (mut session, _backend) = session(connector);

        assert!(session.hydrate(
            Some("Loaded".to_string()),
            vec![Message::user("old question")],
        ));
        assert_eq!(session.title(), "Loaded");
        assert_eq!(session.timeline().len(), 1);

        session.send_message("new");
        assert!(!session.hydrate(None, Vec::new()));
        assert_eq!(session.timeline().len(), 3);
    }

    #[tokio::test]
    async fn hydrate_never_replaces_a_finished_exchange() {
        let connector = ScriptedConnector::new([Attempt::Complete(vec![chunk("Hi there")])]);
        let (mut session, _backend) = session(connector);

        session.send_message("Hello");
        run_to_end(&mut session).await;
        let before = session.timeline().clone();

        assert!(!session.hydrate(
            Some("Server copy".to_string()),
            vec![Message::user("stale server copy")],
        ));
        assert!(session.timeline().ptr_eq(&before));
        assert_eq!(session.timeline().len(), 2);
        assert_eq!(session.title(), "Hi there...");
    }

    #[test]
    fn send_without_runtime_fails_instead_of_panicking() {
        let connector = ScriptedConnector::new([Attempt::Complete(vec![chunk("unused")])]);
        let (mut session, _backend) = session(connector.clone());

        let outcome = session.send_message("Hello");

        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                failure: TransportFailure::Interrupted,
                ..
            }
        ));
        assert_eq!(session.status(), SessionStatus::Errored);
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.active_generation(), None);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn dispose_closes_subscriber_channel() {
        let connector = ScriptedConnector::new([Attempt::Hang(vec![])]);
        let (mut session, _backend) = session(connector);
        let mut snapshots = session.subscribe();

        session.send_message("bye");
        session.dispose();

        assert_eq!(snapshots.borrow_and_update().status, SessionStatus::Idle);
        assert!(snapshots.changed().await.is_err());
    }
}
