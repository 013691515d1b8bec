use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use teloxide::prelude::*;

mod conversations;
mod helpers;
mod integrations;
mod message_handlers;
mod webhook;

use conversations::{ConversationStage, ConversationStore};
use helpers::*;
use integrations::{pick_random_ready, ItemStore, NotionStore};
use message_handlers::*;
use webhook::*;

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
// Notion rejects rich text segments longer than 2000 characters.
const NOTION_TEXT_LIMIT: usize = 1800;
// Telegram caps a text message at 4096 UTF-16 code units.
const TELEGRAM_SAFE_LIMIT: usize = 4000;
const DEFAULT_WEBHOOK_PATH: &str = "/webhook";
const DEFAULT_PORT: u16 = 8000;
const ADD_PROMPT_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    telegram_token: Option<String>,
    notion_token: Option<String>,
    database_id: Option<String>,
    webhook_path: Option<String>,
    public_url: Option<String>,
    bind_addr: Option<String>,
    allowed_user_id: Option<u64>,
    conversation_ttl_seconds: Option<u64>,
    notion_api_base: Option<String>,
}

#[derive(Debug, Clone)]
struct Config {
    telegram_token: String,
    notion: NotionConfig,
    webhook: WebhookConfig,
    allowed_user_id: Option<u64>,
    conversation_ttl_seconds: u64,
}

impl Config {
    fn is_allowed(&self, user_id: u64) -> bool {
        self.allowed_user_id.map_or(true, |allowed| allowed == user_id)
    }
}

#[derive(Debug, Clone)]
struct NotionConfig {
    token: String,
    database_id: String,
    api_base: String,
}

#[derive(Debug, Clone)]
struct WebhookConfig {
    path: String,
    public_url: Option<String>,
    bind_addr: String,
}

#[derive(Parser, Debug)]
struct Args {
    /// Optional TOML file; environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemStatus {
    Ready,
    Published,
}

impl ItemStatus {
    fn select_name(self) -> &'static str {
        match self {
            ItemStatus::Ready => "Готов",
            ItemStatus::Published => "Залит",
        }
    }

    fn from_select_name(name: &str) -> Option<Self> {
        match name {
            "Готов" => Some(ItemStatus::Ready),
            "Залит" => Some(ItemStatus::Published),
            _ => None,
        }
    }
}

/// One reel in the content queue.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Item {
    id: String,
    title: String,
    hook: String,
    description: String,
    status: ItemStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct NewItem {
    title: String,
    hook: String,
    description: String,
}

struct AppState {
    config: Config,
    store: Arc<dyn ItemStore>,
    conversations: ConversationStore,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref(), |key| std::env::var(key).ok())?;

    let store = NotionStore::new(&config.notion).context("build notion client")?;
    let state = Arc::new(AppState {
        conversations: ConversationStore::new(Duration::from_secs(
            config.conversation_ttl_seconds,
        )),
        store: Arc::new(store),
        config: config.clone(),
    });

    let bot = Bot::new(config.telegram_token.clone());
    serve(BotApp::new(bot, state), &config.webhook).await
}
