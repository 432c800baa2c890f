//! One supervised server-push connection per outstanding send.
//!
//! [`StreamTransport::open`] checks credentials synchronously, then spawns a worker that
//! drives a [`PushConnector`], maps raw frames into [`TransportEvent`]s and reconnects with
//! exponential backoff. The owner sees one typed event stream that ends with exactly one
//! terminal event, or with nothing at all once [`StreamTransport::close`] has been called.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use snafu::OptionExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::BoxFuture;
use crate::credential::{Credential, CredentialSource};
use crate::error::{
    AuthenticationRequiredSnafu, RuntimeUnavailableSnafu, TransportError, TransportResult,
};
use crate::ids::{ChatId, StreamGeneration};

/// Control event names carried in the SSE `event:` field.
pub const TYPING_START_EVENT: &str = "typing:start";
pub const TYPING_END_EVENT: &str = "typing:end";
/// Event name used for frames without an explicit `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One undecoded push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub event: String,
    pub data: String,
}

impl RawFrame {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Frames of one live connection. Ending without an error means graceful completion.
pub type FrameStream = BoxStream<'static, TransportResult<RawFrame>>;

/// Everything a connector needs to (re)open the push endpoint for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub chat_id: ChatId,
    pub message: String,
    pub credential: Credential,
}

/// Opens push connections. Implementations must not retry on their own.
pub trait PushConnector: Send + Sync {
    fn connect<'a>(&'a self, request: &'a ConnectRequest)
    -> BoxFuture<'a, TransportResult<FrameStream>>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2_000))
    }
}

impl ReconnectPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before reconnect `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Why a stream ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    AuthenticationRequired,
    MaxReconnectExceeded { attempts: u32 },
    Rejected { status: u16 },
    /// The stream went away without a terminal event.
    Interrupted,
}

impl TransportFailure {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication-required",
            Self::MaxReconnectExceeded { .. } => "max-reconnect-exceeded",
            Self::Rejected { .. } => "stream-rejected",
            Self::Interrupted => "stream-interrupted",
        }
    }

    /// Short banner text for the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthenticationRequired => {
                "Authentication required. Please log in again.".to_string()
            }
            Self::MaxReconnectExceeded { attempts } => format!(
                "Connection lost after {attempts} reconnect attempts. Please try again."
            ),
            Self::Rejected { status } => {
                format!("The server refused the message (status {status}). Please try again.")
            }
            Self::Interrupted => "The reply was interrupted. Please try again.".to_string(),
        }
    }

    pub fn from_error(error: &TransportError) -> Self {
        match error {
            TransportError::AuthenticationRequired { .. } => Self::AuthenticationRequired,
            TransportError::Rejected { status, .. } => Self::Rejected { status: *status },
            TransportError::Connect { .. }
            | TransportError::Stream { .. }
            | TransportError::RuntimeUnavailable { .. } => Self::Interrupted,
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Chunk(String),
    TypingStart,
    TypingEnd,
    Closed,
    Failed(TransportFailure),
}

impl TransportEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

/// Event tagged with the generation of the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: StreamGeneration,
    pub kind: TransportEventKind,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    content: String,
}

/// Maps one raw frame to an event; malformed or unknown frames are logged and dropped.
pub(crate) fn parse_frame(chat_id: &ChatId, frame: &RawFrame) -> Option<TransportEventKind> {
    match frame.event.as_str() {
        TYPING_START_EVENT => Some(TransportEventKind::TypingStart),
        TYPING_END_EVENT => Some(TransportEventKind::TypingEnd),
        DEFAULT_EVENT | "" => match serde_json::from_str::<ChunkPayload>(&frame.data) {
            Ok(payload) => Some(TransportEventKind::Chunk(payload.content)),
            Err(error) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    error = %error,
                    data_len = frame.data.len(),
                    "dropping malformed push frame"
                );
                None
            }
        },
        other => {
            tracing::debug!(chat_id = %chat_id, event = other, "ignoring unknown push event");
            None
        }
    }
}

enum ConnectionOutcome {
    Completed,
    ConsumerGone,
    Broken(TransportError),
}

/// Owner-side handle of one supervised connection.
pub struct StreamTransport {
    chat_id: ChatId,
    generation: StreamGeneration,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl StreamTransport {
    /// Opens the push connection for one send.
    ///
    /// Fails immediately, without spawning anything, when no valid credential is available
    /// or when called outside a tokio runtime.
    pub fn open(
        chat_id: ChatId,
        message: impl Into<String>,
        generation: StreamGeneration,
        connector: Arc<dyn PushConnector>,
        credentials: &dyn CredentialSource,
        policy: ReconnectPolicy,
    ) -> TransportResult<Self> {
        let credential = credentials
            .valid_credential()
            .context(AuthenticationRequiredSnafu {
                stage: "open-transport",
                chat_id: chat_id.clone(),
            })?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            RuntimeUnavailableSnafu {
                stage: "open-transport",
                chat_id: chat_id.clone(),
            }
            .build()
        })?;

        let request = ConnectRequest {
            chat_id: chat_id.clone(),
            message: message.into(),
            credential,
        };
        let (event_tx, events) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let worker = runtime.spawn(run_worker(
            request, generation, connector, policy, event_tx, cancel_rx,
        ));

        tracing::debug!(chat_id = %chat_id, generation = %generation, "opened stream transport");

        Ok(Self {
            chat_id,
            generation,
            events,
            cancel_tx: Some(cancel_tx),
            worker: Some(worker),
            closed: false,
        })
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn generation(&self) -> StreamGeneration {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next event, or `None` once the stream ended or was closed.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Tears the connection down and suppresses every further event. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.events.close();
        tracing::debug!(
            chat_id = %self.chat_id,
            generation = %self.generation,
            "closed stream transport"
        );
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_worker(
    request: ConnectRequest,
    generation: StreamGeneration,
    connector: Arc<dyn PushConnector>,
    policy: ReconnectPolicy,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let chat_id = request.chat_id.clone();
    let emit = |kind: TransportEventKind| {
        let _ = event_tx.send(TransportEvent { generation, kind });
    };
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = &mut cancel_rx => return,
            outcome = run_connection(
                connector.as_ref(),
                &request,
                generation,
                &event_tx,
                &mut attempt,
            ) => outcome,
        };

        let error = match outcome {
            ConnectionOutcome::Completed => {
                tracing::debug!(chat_id = %chat_id, generation = %generation, "stream completed");
                emit(TransportEventKind::Closed);
                return;
            }
            ConnectionOutcome::ConsumerGone => return,
            ConnectionOutcome::Broken(error) => error,
        };

        if !error.is_retryable() {
            tracing::error!(
                chat_id = %chat_id,
                generation = %generation,
                error = %error,
                "stream failed without retry"
            );
            emit(TransportEventKind::Failed(TransportFailure::from_error(&error)));
            return;
        }

        if attempt >= policy.max_attempts {
            tracing::error!(
                chat_id = %chat_id,
                generation = %generation,
                attempts = attempt,
                error = %error,
                "max reconnect attempts reached, giving up"
            );
            emit(TransportEventKind::Failed(
                TransportFailure::MaxReconnectExceeded { attempts: attempt },
            ));
            return;
        }

        attempt += 1;
        let delay = policy.delay_for(attempt);
        tracing::warn!(
            chat_id = %chat_id,
            generation = %generation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "stream connection error, scheduling reconnect"
        );

        tokio::select! {
            biased;
            _ = &mut cancel_rx => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_connection(
    connector: &dyn PushConnector,
    request: &ConnectRequest,
    generation: StreamGeneration,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    attempt: &mut u32,
) -> ConnectionOutcome {
    let mut frames = match connector.connect(request).await {
        Ok(frames) => frames,
        Err(error) => return ConnectionOutcome::Broken(error),
    };
    *attempt = 0;

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => return ConnectionOutcome::Broken(error),
        };
        let Some(kind) = parse_frame(&request.chat_id, &frame) else {
            continue;
        };
        if event_tx.send(TransportEvent { generation, kind }).is_err() {
            return ConnectionOutcome::ConsumerGone;
        }
    }

    ConnectionOutcome::Completed
}
