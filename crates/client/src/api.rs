use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use rill_chat::backend::NewChatResponse;
use rill_chat::error::{BoxError, DecodeSnafu, RequestSnafu, StatusSnafu, UnauthorizedSnafu};
use rill_chat::{
    AuthSession, BackendError, BackendResult, BoxFuture, ChatBackend, ChatId, ChatRecord,
    ChatSummary, ClientConfig, CredentialSource,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

/// JSON backend under `api_base_url`.
#[derive(Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    credentials: Arc<dyn CredentialSource>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupBody<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

impl HttpChatBackend {
    pub fn new(
        client: reqwest::Client,
        config: &ClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .timeout(self.timeout);
        match self.credentials.current() {
            Some(credential) => builder.bearer_auth(credential.token),
            None => builder,
        }
    }

    async fn execute(&self, stage: &'static str, builder: RequestBuilder) -> BackendResult<String> {
        let response = builder
            .send()
            .await
            .map_err(BoxError::from)
            .context(RequestSnafu { stage })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(BoxError::from)
            .context(RequestSnafu { stage })?;

        if !status.is_success() {
            tracing::warn!(stage, status = status.as_u16(), "backend call failed");
            return Err(status_error(stage, status, body));
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        builder: RequestBuilder,
    ) -> BackendResult<T> {
        let body = self.execute(stage, builder).await?;
        serde_json::from_str(&body).context(DecodeSnafu { stage })
    }
}

pub(crate) fn status_error(stage: &'static str, status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED => UnauthorizedSnafu { stage }.build(),
        _ => StatusSnafu {
            stage,
            status: status.as_u16(),
            body,
        }
        .build(),
    }
}

impl ChatBackend for HttpChatBackend {
    fn login_user<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthSession>> {
        Box::pin(async move {
            let builder = self
                .request(reqwest::Method::POST, "auth/login")
                .json(&LoginBody { email, password });
            self.fetch("login", builder).await
        })
    }

    fn signup_user<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthSession>> {
        Box::pin(async move {
            let builder = self
                .request(reqwest::Method::POST, "auth/signup")
                .json(&SignupBody {
                    name,
                    email,
                    password,
                });
            self.fetch("signup", builder).await
        })
    }

    fn start_new_chat(&self) -> BoxFuture<'_, BackendResult<ChatId>> {
        Box::pin(async move {
            let builder = self.request(reqwest::Method::POST, "chat/new");
            let response: NewChatResponse = self.fetch("start-new-chat", builder).await?;
            Ok(response.chat_id)
        })
    }

    fn load_chat_history(&self) -> BoxFuture<'_, BackendResult<Vec<ChatSummary>>> {
        Box::pin(async move {
            let builder = self.request(reqwest::Method::GET, "chat/history");
            self.fetch("load-chat-history", builder).await
        })
    }

    fn load_chat_by_id<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, BackendResult<ChatRecord>> {
        Box::pin(async move {
            let builder = self.request(reqwest::Method::GET, &format!("chat/{chat_id}"));
            self.fetch("load-chat", builder).await
        })
    }

    fn update_chat_title<'a>(
        &'a self,
        chat_id: &'a ChatId,
        title: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let builder = self
                .request(reqwest::Method::PATCH, &format!("chat/{chat_id}"))
                .json(&TitleBody { title });
            self.execute("update-chat-title", builder).await.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use rill_chat::{Credential, TokenStore};

    use super::*;

    fn backend(base_url: &str, credentials: TokenStore) -> HttpChatBackend {
        let config = ClientConfig {
            api_base_url: base_url.to_string(),
            ..ClientConfig::default()
        };
        HttpChatBackend::new(reqwest::Client::new(), &config, Arc::new(credentials))
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let backend = backend("https://chat.example.com/api/", TokenStore::new());

        assert_eq!(backend.base_url(), "https://chat.example.com/api");
        assert_eq!(backend.url("/chat/new"), "https://chat.example.com/api/chat/new");
        assert_eq!(backend.url("chat/c1"), "https://chat.example.com/api/chat/c1");
    }

    #[test]
    fn requests_carry_bearer_token_when_signed_in() {
        let store = TokenStore::with_credential(Credential {
            token: "abc".to_string(),
            expires_at: None,
        });
        let request = backend("http://localhost:3000/api", store)
            .request(reqwest::Method::GET, "chat/history")
            .build()
            .expect("request builds");

        assert_eq!(
            request
                .headers()
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(request.url().path(), "/api/chat/history");
    }

    #[test]
    fn anonymous_requests_have_no_authorization_header() {
        let request = backend("http://localhost:3000/api", TokenStore::new())
            .request(reqwest::Method::POST, "auth/login")
            .build()
            .expect("request builds");

        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn statuses_map_to_backend_errors() {
        assert!(matches!(
            status_error("login", StatusCode::UNAUTHORIZED, String::new()),
            BackendError::Unauthorized { stage: "login" }
        ));
        assert!(matches!(
            status_error("load-chat", StatusCode::NOT_FOUND, "missing".to_string()),
            BackendError::Status { status: 404, ref body, .. } if body == "missing"
        ));
    }
}
