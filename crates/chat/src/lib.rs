#![deny(unsafe_code)]

//! Conversation synchronization core.
//!
//! A [`ChatRegistry`] owns one [`ChatSession`] per chat. Each session owns at most one live
//! [`StreamTransport`] whose typed events are folded into an immutable [`Timeline`] by the
//! [`MessageReconciler`]. Everything here is driven from a single event loop; only the
//! transport worker and the backoff timers suspend.

pub mod backend;
pub mod config;
pub mod credential;
pub mod error;
pub mod ids;
pub mod message;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod summary;
pub mod transport;

pub use backend::{
    AuthSession, BoxFuture, ChatBackend, ChatRecord, HistoryMessage, UserProfile,
};
pub use config::{ClientConfig, ConfigStore, StreamSettings, SummarySettings};
pub use credential::{Credential, CredentialSource, TokenStore};
pub use error::{
    BackendError, BackendResult, CredentialError, RegistryError, RegistryResult,
    TransportError, TransportResult,
};
pub use ids::{ChatId, MessageId, StreamGeneration};
pub use message::{Message, Sender, Timeline};
pub use reconciler::{MessageReconciler, ReconcileRejection};
pub use registry::ChatRegistry;
pub use session::{
    ChatSession, SendOutcome, SendRejection, SessionContext, SessionEvent, SessionSnapshot,
    SessionStatus,
};
pub use summary::{ChatSummary, SummaryPatch, derive_preview, derive_title};
pub use transport::{
    ConnectRequest, FrameStream, PushConnector, RawFrame, ReconnectPolicy, StreamTransport,
    TransportEvent, TransportEventKind, TransportFailure,
};
