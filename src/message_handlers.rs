use super::*;

const NO_READY_REELS: &str = "Нет доступных Reels со статусом 'Готов'.";
const ADD_PROMPT: &str =
    "Введи хук и описание в одном сообщении. Первый абзац — хук, остальное — описание.";
const ADD_DONE: &str = "✅ Запись добавлена в таблицу.";
const HELP: &str = "Команды:\n/reel — случайный Reels со статусом 'Готов' (после отправки он помечается как 'Залит')\n/score — сколько Reels со статусом 'Готов'\n/add <хук>\\n\\n<описание> — добавить запись одним сообщением\n/add — добавить запись в диалоге\n/cancel — отменить добавление";

/// Outgoing side of a chat.
#[async_trait]
pub(super) trait Replier: Send + Sync {
    async fn reply(&self, text: &str) -> Result<()>;
}

pub(super) struct ChatReplier {
    bot: Bot,
    chat_id: ChatId,
}

#[async_trait]
impl Replier for ChatReplier {
    async fn reply(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }
}

pub(super) async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let user_id = match msg.from() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    if !state.config.is_allowed(user_id) {
        debug!("ignoring message from user {}", user_id);
        return Ok(());
    }

    let text = match msg.text() {
        Some(text) => text.to_string(),
        None => return Ok(()),
    };

    let replier = ChatReplier {
        bot,
        chat_id: msg.chat.id,
    };
    handle_text(&replier, &state, user_id, &text).await
}

pub(super) async fn handle_text(
    replier: &dyn Replier,
    state: &AppState,
    user_id: u64,
    text: &str,
) -> Result<()> {
    let mut conversation = state.conversations.lock(user_id).await;

    if let Some(cmd) = parse_command(text) {
        let rest = command_argument(text);
        match cmd {
            "start" | "help" => {
                replier.reply(HELP).await?;
            }
            "reel" => {
                send_reel(replier, state).await?;
            }
            "score" => {
                report_score(replier, state).await?;
            }
            "add" => {
                if rest.is_empty() {
                    conversation.begin(ConversationStage::AwaitingText);
                    replier.reply(ADD_PROMPT).await?;
                } else {
                    add_item(replier, state, rest).await?;
                }
            }
            "cancel" => {
                let open = conversation.active().is_some();
                conversation.end();
                if open {
                    replier.reply("Добавление отменено.").await?;
                } else {
                    replier.reply("Нечего отменять.").await?;
                }
            }
            _ => {
                debug!("unknown command /{}", cmd);
            }
        }
        return Ok(());
    }

    match conversation.active() {
        Some(ConversationStage::AwaitingText) => {
            if text.trim().is_empty() {
                replier.reply(ADD_PROMPT).await?;
                return Ok(());
            }
            // Closed before replying so a redelivered update cannot add twice.
            conversation.end();
            add_item(replier, state, text).await?;
        }
        None => {
            debug!("ignoring text outside of a conversation from user {}", user_id);
        }
    }

    Ok(())
}

async fn send_reel(replier: &dyn Replier, state: &AppState) -> Result<()> {
    let item = match pick_random_ready(state.store.as_ref()).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            replier.reply(NO_READY_REELS).await?;
            return Ok(());
        }
        Err(err) => {
            error!("fetching ready reels failed: {}", err);
            replier
                .reply(&format!("Ошибка при получении Reels: {}", err))
                .await?;
            return Ok(());
        }
    };

    if !item.hook.is_empty() {
        replier.reply(&item.hook).await?;
    }
    if utf16_len(&item.description) <= TELEGRAM_SAFE_LIMIT {
        if !item.description.is_empty() {
            replier.reply(&item.description).await?;
        }
    } else {
        for part in split_utf16(&item.description, TELEGRAM_SAFE_LIMIT) {
            replier.reply(&part).await?;
        }
    }

    if let Err(err) = state.store.mark_published(&item.id).await {
        error!("marking {} as published failed: {}", item.id, err);
        replier
            .reply(&format!("Ошибка при обновлении статуса: {}", err))
            .await?;
        return Ok(());
    }
    info!("published item {} {:?}", item.id, item.title);
    Ok(())
}

async fn report_score(replier: &dyn Replier, state: &AppState) -> Result<()> {
    match state.store.query_ready().await {
        Ok(items) => {
            replier
                .reply(&format!(
                    "📊 Сейчас {} Reels со статусом 'Готов'.",
                    items.len()
                ))
                .await
        }
        Err(err) => {
            error!("counting ready reels failed: {}", err);
            replier.reply(&format!("Ошибка при подсчёте: {}", err)).await
        }
    }
}

async fn add_item(replier: &dyn Replier, state: &AppState, text: &str) -> Result<()> {
    let (hook, description) = split_hook_description(text);
    let item = NewItem {
        title: String::new(),
        hook,
        description,
    };
    match state.store.create_item(&item).await {
        Ok(()) => {
            info!("added item with hook of {} char(s)", item.hook.chars().count());
            replier.reply(ADD_DONE).await
        }
        Err(err) => {
            error!("adding item failed: {}", err);
            replier.reply(&format!("Ошибка при добавлении: {}", err)).await
        }
    }
}
