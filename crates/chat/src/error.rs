use snafu::Snafu;

use crate::ids::ChatId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("no valid credential available to stream chat '{chat_id}'"))]
    AuthenticationRequired {
        stage: &'static str,
        chat_id: ChatId,
    },
    #[snafu(display("failed to connect stream for chat '{chat_id}' on `{stage}`: {message}"))]
    Connect {
        stage: &'static str,
        chat_id: ChatId,
        message: String,
    },
    #[snafu(display("stream for chat '{chat_id}' broke on `{stage}`: {message}"))]
    Stream {
        stage: &'static str,
        chat_id: ChatId,
        message: String,
    },
    #[snafu(display(
        "stream endpoint for chat '{chat_id}' refused with status {status}: {message}"
    ))]
    Rejected {
        stage: &'static str,
        chat_id: ChatId,
        status: u16,
        message: String,
    },
    #[snafu(display("no tokio runtime to drive the stream for chat '{chat_id}' on `{stage}`"))]
    RuntimeUnavailable {
        stage: &'static str,
        chat_id: ChatId,
    },
}

impl TransportError {
    /// Connection drops and refused connects are worth another attempt; auth and 4xx are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Stream { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display("backend request failed on `{stage}`: {source}"))]
    Request { stage: &'static str, source: BoxError },
    #[snafu(display("backend rejected credentials on `{stage}`"))]
    Unauthorized { stage: &'static str },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode backend payload on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RegistryError {
    #[snafu(display("chat '{chat_id}' is not known to the registry"))]
    ChatNotFound {
        stage: &'static str,
        chat_id: ChatId,
    },
    #[snafu(display("chat '{chat_id}' is busy streaming, refusing `{stage}`"))]
    SessionBusy {
        stage: &'static str,
        chat_id: ChatId,
    },
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("token is not a JWT: {details}"))]
    MalformedToken {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to decode JWT payload on `{stage}`: {source}"))]
    DecodePayload {
        stage: &'static str,
        source: base64::DecodeError,
    },
    #[snafu(display("failed to parse JWT claims on `{stage}`: {source}"))]
    ParseClaims {
        stage: &'static str,
        source: serde_json::Error,
    },
}
