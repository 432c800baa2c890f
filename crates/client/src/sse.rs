use futures::{StreamExt, stream};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry};
use rill_chat::error::{AuthenticationRequiredSnafu, ConnectSnafu, RejectedSnafu, StreamSnafu};
use rill_chat::{
    BoxFuture, ChatId, ClientConfig, ConnectRequest, FrameStream, PushConnector, RawFrame,
    TransportError, TransportResult,
};

/// Push connector over server-sent events. Retries are left to the transport.
#[derive(Clone)]
pub struct SseConnector {
    client: reqwest::Client,
    base_url: String,
}

impl SseConnector {
    pub fn new(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn stream_request(&self, request: &ConnectRequest) -> reqwest::RequestBuilder {
        let token = request.credential.token.as_str();
        self.client
            .get(format!("{}/chat/{}/message", self.base_url, request.chat_id))
            .query(&[("message", request.message.as_str()), ("token", token)])
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
    }
}

impl PushConnector for SseConnector {
    fn connect<'a>(
        &'a self,
        request: &'a ConnectRequest,
    ) -> BoxFuture<'a, TransportResult<FrameStream>> {
        Box::pin(async move {
            let chat_id = request.chat_id.clone();
            let mut source = EventSource::new(self.stream_request(request)).map_err(|error| {
                ConnectSnafu {
                    stage: "sse-build",
                    chat_id: chat_id.clone(),
                    message: error.to_string(),
                }
                .build()
            })?;
            source.set_retry_policy(Box::new(retry::Never));

            // Hold the connect future until the endpoint answers so open failures stay distinct.
            let first = match source.next().await {
                Some(Ok(Event::Open)) => None,
                Some(Ok(Event::Message(message))) => Some(RawFrame {
                    event: message.event,
                    data: message.data,
                }),
                Some(Err(error)) => {
                    source.close();
                    return Err(map_error(&chat_id, "sse-open", false, error));
                }
                None => {
                    return ConnectSnafu {
                        stage: "sse-open",
                        chat_id,
                        message: "event source closed before opening".to_string(),
                    }
                    .fail();
                }
            };
            tracing::debug!(chat_id = %chat_id, "push stream opened");

            let frames = source.filter_map(move |item| {
                let chat_id = chat_id.clone();
                async move {
                    match item {
                        Ok(Event::Open) => None,
                        Ok(Event::Message(message)) => Some(Ok(RawFrame {
                            event: message.event,
                            data: message.data,
                        })),
                        Err(EventSourceError::StreamEnded) => None,
                        Err(error) => Some(Err(map_error(&chat_id, "sse-read", true, error))),
                    }
                }
            });

            Ok(stream::iter(first.map(Ok)).chain(frames).boxed())
        })
    }
}

fn map_error(
    chat_id: &ChatId,
    stage: &'static str,
    opened: bool,
    error: EventSourceError,
) -> TransportError {
    match error {
        EventSourceError::InvalidStatusCode(status, _) => status_error(chat_id, stage, status),
        EventSourceError::InvalidContentType(content_type, response) => RejectedSnafu {
            stage,
            chat_id: chat_id.clone(),
            status: response.status().as_u16(),
            message: format!("unexpected content type {content_type:?}"),
        }
        .build(),
        other if opened => StreamSnafu {
            stage,
            chat_id: chat_id.clone(),
            message: other.to_string(),
        }
        .build(),
        other => ConnectSnafu {
            stage,
            chat_id: chat_id.clone(),
            message: other.to_string(),
        }
        .build(),
    }
}

/// 401/403 need a new credential, other 4xx will not change on retry, 5xx might.
pub(crate) fn status_error(
    chat_id: &ChatId,
    stage: &'static str,
    status: StatusCode,
) -> TransportError {
    let chat_id = chat_id.clone();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AuthenticationRequiredSnafu { stage, chat_id }.build()
        }
        status if status.is_client_error() => RejectedSnafu {
            stage,
            chat_id,
            status: status.as_u16(),
            message: status.to_string(),
        }
        .build(),
        status => ConnectSnafu {
            stage,
            chat_id,
            message: format!("server answered {status}"),
        }
        .build(),
    }
}
