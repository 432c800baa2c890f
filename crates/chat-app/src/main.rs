//! Terminal front end: one chat at a time, replies streamed as they arrive.

mod command;

use std::env;
use std::io::Write;
use std::sync::Arc;

use rill_chat::{
    BackendError, ChatBackend, ChatId, ChatRegistry, ConfigStore, RegistryError, SendOutcome,
    SessionContext, SessionEvent, Timeline, TokenStore,
};
use rill_client::{HttpChatBackend, SseConnector, build_http_client};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::command::Command;

const TOKEN_VAR: &str = "RILL_TOKEN";
const EMAIL_VAR: &str = "RILL_EMAIL";
const PASSWORD_VAR: &str = "RILL_PASSWORD";
const NAME_VAR: &str = "RILL_NAME";
const CHAT_ID_VAR: &str = "RILL_CHAT_ID";

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("set {TOKEN_VAR}, or {EMAIL_VAR} and {PASSWORD_VAR}, to sign in"))]
    MissingCredential { stage: &'static str },
    #[snafu(display("{TOKEN_VAR} is not a usable token"))]
    InvalidToken { stage: &'static str },
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("chat registry failed on `{stage}`: {source}"))]
    Registry {
        stage: &'static str,
        source: RegistryError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

type AppResult<T> = Result<T, AppError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        eprintln!("rill: {error}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let store = ConfigStore::load();
    let config = store.config();
    tracing::debug!(path = ?store.path(), base_url = %config.api_base_url, "loaded config");

    let tokens = Arc::new(TokenStore::new());
    let client = build_http_client(&config).context(BackendSnafu {
        stage: "build-http-client",
    })?;
    let backend = Arc::new(HttpChatBackend::new(client.clone(), &config, tokens.clone()));
    sign_in(&tokens, backend.as_ref()).await?;

    let mut registry = ChatRegistry::new(SessionContext {
        connector: Arc::new(SseConnector::new(client, &config)),
        credentials: tokens.clone(),
        backend: backend.clone(),
        policy: config.stream.reconnect_policy(),
        summary: config.summary.clone(),
    });

    if let Err(error) = registry.load_history().await {
        tracing::warn!(error = %error, "could not load chat history");
    }

    let chat_id = match env::var(CHAT_ID_VAR) {
        Ok(raw) if !raw.trim().is_empty() => ChatId::new(raw),
        _ => registry.allocate_new_chat().await.context(RegistrySnafu {
            stage: "allocate-chat",
        })?,
    };
    let session = registry.open_chat(&chat_id).await.context(RegistrySnafu {
        stage: "open-chat",
    })?;
    println!("# {} ({chat_id})", session.title());
    print_timeline(session.timeline());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await.context(ReadInputSnafu {
            stage: "read-line",
        })?
        else {
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Unknown(name) => println!("unknown command /{name}"),
            Command::List(filter) => {
                for summary in registry.list(&filter) {
                    let marker = if summary.chat_id == chat_id { "*" } else { " " };
                    println!("{marker} {}  {}", summary.chat_id, summary.title);
                    if !summary.last_message_preview.is_empty() {
                        println!("    {}", summary.last_message_preview);
                    }
                }
            }
            Command::Title(title) => {
                let renamed = registry.rename_chat(&chat_id, &title).context(RegistrySnafu {
                    stage: "rename-chat",
                })?;
                if renamed {
                    println!("renamed to {}", title.trim());
                } else {
                    println!("title cannot be blank");
                }
            }
            Command::Send(content) => {
                let session = registry.get_or_create(&chat_id);
                match session.send_message(&content) {
                    SendOutcome::Streaming { .. } => stream_reply(&mut registry, &chat_id).await?,
                    SendOutcome::Failed { failure, .. } => println!("! {}", failure.user_message()),
                    SendOutcome::Rejected(reason) => {
                        tracing::debug!(reason = ?reason, "send rejected");
                    }
                }
            }
        }
    }

    registry.evict(&chat_id);
    Ok(())
}

async fn sign_in(tokens: &TokenStore, backend: &dyn ChatBackend) -> AppResult<()> {
    if let Ok(token) = env::var(TOKEN_VAR) {
        if tokens.set_token(token) {
            return Ok(());
        }
        return InvalidTokenSnafu { stage: "sign-in" }.fail();
    }

    let (Ok(email), Ok(password)) = (env::var(EMAIL_VAR), env::var(PASSWORD_VAR)) else {
        return MissingCredentialSnafu { stage: "sign-in" }.fail();
    };
    let session = match env::var(NAME_VAR) {
        Ok(name) => backend.signup_user(&name, &email, &password).await,
        Err(_) => backend.login_user(&email, &password).await,
    }
    .context(BackendSnafu { stage: "sign-in" })?;

    if !tokens.set_token(session.token) {
        return InvalidTokenSnafu { stage: "sign-in" }.fail();
    }
    tracing::info!(user = %session.user.email, "signed in");
    Ok(())
}

async fn stream_reply(registry: &mut ChatRegistry, chat_id: &ChatId) -> AppResult<()> {
    while let Some(event) = registry.drive(chat_id).await.context(RegistrySnafu {
        stage: "drive-session",
    })? {
        match event {
            SessionEvent::Chunk { text, .. } => {
                print!("{text}");
                flush();
            }
            SessionEvent::Typing(true) => {
                print!("...");
                flush();
            }
            SessionEvent::Typing(false) => {}
            SessionEvent::Completed { summary, .. } => {
                println!();
                if let Some(title) = summary.title {
                    println!("# {title}");
                }
            }
            SessionEvent::Failed { failure, .. } => {
                println!();
                println!("! {}", failure.user_message());
            }
        }
    }
    Ok(())
}

fn print_timeline(timeline: &Timeline) {
    for message in timeline.messages() {
        println!("{}: {}", message.sender, message.content);
    }
}

fn prompt() {
    print!("> ");
    flush();
}

fn flush() {
    let _ = std::io::stdout().flush();
}
