use super::*;
use std::ops::ControlFlow;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use teloxide::dispatching::UpdateHandler;
use tokio::net::TcpListener;

/// Receives decoded Telegram updates from the webhook endpoint.
#[async_trait]
pub(super) trait UpdateProcessor: Send + Sync {
    async fn process_update(&self, update: Update) -> Result<()>;
}

/// The one place handlers are registered.
pub(super) fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry().branch(Update::filter_message().endpoint(handle_message))
}

/// A bot that has not been initialized yet and cannot process updates.
pub(super) struct BotApp {
    bot: Bot,
    state: Arc<AppState>,
}

impl BotApp {
    pub(super) fn new(bot: Bot, state: Arc<AppState>) -> Self {
        BotApp { bot, state }
    }

    /// Checks the token with `getMe` and registers the webhook when a public
    /// URL is configured.
    pub(super) async fn initialize(self, webhook: &WebhookConfig) -> Result<RunningBot> {
        let me = self.bot.get_me().await.context("telegram getMe")?;
        info!(
            "bot @{} initialized",
            me.user.username.as_deref().unwrap_or("<unnamed>")
        );

        if let Some(public_url) = &webhook.public_url {
            let raw = format!("{}{}", public_url, webhook.path);
            let url = url::Url::parse(&raw).with_context(|| format!("parse webhook url {}", raw))?;
            self.bot
                .set_webhook(url)
                .await
                .context("telegram setWebhook")?;
            info!("webhook registered at {}", raw);
        }

        Ok(RunningBot {
            bot: self.bot,
            state: self.state,
            handler: schema(),
        })
    }
}

/// An initialized bot; the only type able to dispatch updates.
pub(super) struct RunningBot {
    bot: Bot,
    state: Arc<AppState>,
    handler: UpdateHandler<anyhow::Error>,
}

impl RunningBot {
    /// Reports `/add` conversations cut short by the shutdown. They live only
    /// in memory, and the Telegram client holds nothing else to release.
    pub(super) async fn shutdown(&self) -> usize {
        let open = self.state.conversations.open_conversations().await;
        if open > 0 {
            warn!("shutting down with {} unfinished /add conversation(s)", open);
        }
        info!("bot shut down");
        open
    }
}

#[async_trait]
impl UpdateProcessor for RunningBot {
    async fn process_update(&self, update: Update) -> Result<()> {
        let deps = dptree::deps![update, self.bot.clone(), self.state.clone()];
        match self.handler.dispatch(deps).await {
            ControlFlow::Break(result) => result,
            ControlFlow::Continue(_) => {
                debug!("update not handled");
                Ok(())
            }
        }
    }
}

#[derive(Clone)]
pub(super) struct WebhookState {
    path_prefix: String,
    processor: Arc<dyn UpdateProcessor>,
}

pub(super) fn build_router(path_prefix: &str, processor: Arc<dyn UpdateProcessor>) -> Router {
    let state = WebhookState {
        path_prefix: normalize_webhook_path(path_prefix),
        processor,
    };
    Router::new()
        .route("/", get(health).post(telegram_webhook))
        .route("/{*path}", post(telegram_webhook))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn telegram_webhook(
    State(state): State<WebhookState>,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path();
    debug!("webhook hit {}", path);
    if !path.starts_with(&state.path_prefix) {
        info!("skipping {} (expected prefix {})", path, state.path_prefix);
        return (StatusCode::OK, Json(json!({ "ok": true, "skip": true })));
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!("undecodable update on {}: {}", path, err);
            return (StatusCode::BAD_REQUEST, Json(json!({ "ok": false })));
        }
    };

    match state.processor.process_update(update).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(err) => {
            error!("update processing failed: {:#}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false })))
        }
    }
}

/// Binds the listener, initializes the bot, serves until a shutdown signal,
/// then shuts the bot down.
pub(super) async fn serve(app: BotApp, webhook: &WebhookConfig) -> Result<()> {
    let listener = TcpListener::bind(&webhook.bind_addr)
        .await
        .with_context(|| format!("bind {}", webhook.bind_addr))?;
    info!("listening on {}", webhook.bind_addr);

    let running = Arc::new(app.initialize(webhook).await?);
    let router = build_router(&webhook.path, running.clone());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    running.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("listening for ctrl-c failed: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("listening for SIGTERM failed: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
