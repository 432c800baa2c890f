#![deny(unsafe_code)]

//! HTTP and server-sent-event collaborators for `rill-chat`.

mod api;
mod sse;

use std::time::Duration;

use rill_chat::error::{BoxError, RequestSnafu};
use rill_chat::{BackendResult, ClientConfig};
use snafu::ResultExt;

pub use api::HttpChatBackend;
pub use sse::SseConnector;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client. No total timeout, since push streams stay open for a whole reply.
pub fn build_http_client(config: &ClientConfig) -> BackendResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout()))
        .user_agent(concat!("rill/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(BoxError::from)
        .context(RequestSnafu {
            stage: "build-http-client",
        })
}
