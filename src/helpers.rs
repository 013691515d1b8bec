use super::*;

pub(super) fn load_config<F>(path: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let file = match path {
        Some(path) => read_config_file(path)?,
        None => ConfigFile::default(),
    };

    let telegram_token = require(
        setting(&env, "TELEGRAM_BOT_TOKEN", file.telegram_token),
        "TELEGRAM_BOT_TOKEN",
    )?;
    let notion_token = require(setting(&env, "NOTION_TOKEN", file.notion_token), "NOTION_TOKEN")?;
    let database_id = require(setting(&env, "DATABASE_ID", file.database_id), "DATABASE_ID")?;

    let webhook_path = setting(&env, "WEBHOOK_PATH", file.webhook_path)
        .map(|p| normalize_webhook_path(&p))
        .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
    let public_url = setting(&env, "PUBLIC_URL", file.public_url)
        .map(|url| url.trim_end_matches('/').to_string());
    let bind_addr = match setting(&env, "BIND_ADDR", file.bind_addr) {
        Some(addr) => addr,
        None => {
            let port = match non_blank(env("PORT")) {
                Some(raw) => raw.parse::<u16>().context("parse PORT")?,
                None => DEFAULT_PORT,
            };
            format!("0.0.0.0:{}", port)
        }
    };

    let allowed_user_id = match non_blank(env("ALLOWED_USER_ID")) {
        Some(raw) => Some(parse_u64_setting(&raw, "ALLOWED_USER_ID")?),
        None => file.allowed_user_id,
    };
    let conversation_ttl_seconds = match non_blank(env("CONVERSATION_TTL_SECONDS")) {
        Some(raw) => parse_u64_setting(&raw, "CONVERSATION_TTL_SECONDS")?,
        None => file.conversation_ttl_seconds.unwrap_or(ADD_PROMPT_TTL_SECS),
    };
    let api_base = setting(&env, "NOTION_API_BASE", file.notion_api_base)
        .map(|base| base.trim_end_matches('/').to_string())
        .unwrap_or_else(|| NOTION_API_BASE.to_string());

    Ok(Config {
        telegram_token,
        notion: NotionConfig {
            token: notion_token,
            database_id,
            api_base,
        },
        webhook: WebhookConfig {
            path: webhook_path,
            public_url,
            bind_addr,
        },
        allowed_user_id,
        conversation_ttl_seconds,
    })
}

pub(super) fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&contents).context("parse config")
}

fn setting<F>(env: &F, key: &str, file_value: Option<String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_blank(env(key)).or_else(|| non_blank(file_value))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(value: Option<String>, key: &str) -> Result<String> {
    value.ok_or_else(|| anyhow!("missing required setting {}", key))
}

fn parse_u64_setting(raw: &str, key: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("parse {}", key))
}

pub(super) fn normalize_webhook_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

pub(super) fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}

/// Everything after the command token, trimmed.
pub(super) fn command_argument(text: &str) -> &str {
    text.trim_start()
        .splitn(2, |c: char| c.is_whitespace())
        .nth(1)
        .unwrap_or("")
        .trim()
}

pub(super) fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// First paragraph is the hook, the rest (possibly empty) is the description.
pub(super) fn split_hook_description(text: &str) -> (String, String) {
    let normalized = normalize_line_endings(text);
    match normalized.trim().split_once("\n\n") {
        Some((hook, description)) => (hook.trim().to_string(), description.trim().to_string()),
        None => (normalized.trim().to_string(), String::new()),
    }
}

/// Splits `text` into pieces of at most `max_len` characters, cutting at the
/// last space that keeps the piece within the limit, or mid-word when a piece
/// has no usable space.
pub(super) fn split_text(text: &str, max_len: usize) -> Vec<String> {
    split_measured(text, max_len, |_| 1)
}

/// Same cuts as `split_text`, but lengths are UTF-16 code units, which is how
/// Telegram measures a message.
pub(super) fn split_utf16(text: &str, max_len: usize) -> Vec<String> {
    split_measured(text, max_len, char::len_utf16)
}

pub(super) fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn split_measured(text: &str, max_len: usize, width: fn(char) -> usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let measure = |s: &str| s.chars().map(width).sum::<usize>();
    let mut parts = Vec::new();
    let mut rest = text;

    while measure(rest) > max_len {
        // Byte offset of the first character that no longer fits.
        let mut used = 0;
        let mut limit = rest.len();
        for (idx, c) in rest.char_indices() {
            used += width(c);
            if used > max_len {
                limit = idx;
                break;
            }
        }
        if limit == 0 {
            limit = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (cut, skip) = if rest[limit..].starts_with(' ') {
            (limit, 1)
        } else {
            match rest[..limit].rfind(' ') {
                Some(pos) if pos > 0 => (pos, 1),
                _ => (limit, 0),
            }
        };
        parts.push(rest[..cut].to_string());
        rest = rest[cut + skip..].trim_start();
    }

    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

pub(super) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
