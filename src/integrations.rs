use super::*;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};

const TITLE_PROPERTY: &str = "Видео";
const HOOK_PROPERTY: &str = "Хук";
const DESCRIPTION_PROPERTY: &str = "Описание";
const STATUS_PROPERTY: &str = "Статус";

#[derive(Debug, thiserror::Error)]
pub(super) enum StoreError {
    #[error("store returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected store response: {0}")]
    Decode(String),
}

/// The content queue backing the bot.
#[async_trait]
pub(super) trait ItemStore: Send + Sync {
    async fn query_ready(&self) -> Result<Vec<Item>, StoreError>;
    async fn mark_published(&self, id: &str) -> Result<(), StoreError>;
    async fn create_item(&self, item: &NewItem) -> Result<(), StoreError>;
}

pub(super) async fn pick_random_ready(store: &dyn ItemStore) -> Result<Option<Item>, StoreError> {
    let mut items = store.query_ready().await?;
    items.retain(|item| item.status == ItemStatus::Ready);
    Ok(choose_item(items, &mut rand::thread_rng()))
}

pub(super) fn choose_item<R: Rng + ?Sized>(items: Vec<Item>, rng: &mut R) -> Option<Item> {
    items.choose(rng).cloned()
}

pub(super) struct NotionStore {
    client: reqwest::Client,
    api_base: String,
    database_id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl NotionStore {
    pub(super) fn new(config: &NotionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .context("notion token is not a valid header value")?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("notion-version", HeaderValue::from_static(NOTION_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("build http client")?;
        Ok(NotionStore {
            client,
            api_base: config.api_base.clone(),
            database_id: config.database_id.clone(),
        })
    }

    async fn query_page(&self, cursor: Option<&str>) -> Result<QueryResponse, StoreError> {
        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let mut body = json!({
            "filter": {
                "property": STATUS_PROPERTY,
                "select": { "equals": ItemStatus::Ready.select_name() }
            }
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        let response = ensure_success(self.client.post(url).json(&body).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ItemStore for NotionStore {
    async fn query_ready(&self) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.query_page(cursor.as_deref()).await?;
            for result in &page.results {
                items.push(item_from_page(result)?);
            }
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        debug!("notion query returned {} ready item(s)", items.len());
        Ok(items)
    }

    async fn mark_published(&self, id: &str) -> Result<(), StoreError> {
        let url = format!("{}/pages/{}", self.api_base, id);
        let body = json!({
            "properties": {
                STATUS_PROPERTY: {
                    "select": { "name": ItemStatus::Published.select_name() }
                }
            }
        });
        ensure_success(self.client.patch(url).json(&body).send().await?).await?;
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> Result<(), StoreError> {
        let url = format!("{}/pages", self.api_base);
        let body = create_page_body(&self.database_id, item);
        ensure_success(self.client.post(url).json(&body).send().await?).await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("notion request failed with {}: {}", status, body);
    Err(StoreError::Upstream { status, body })
}

pub(super) fn create_page_body(database_id: &str, item: &NewItem) -> Value {
    let title = if item.title.is_empty() {
        Vec::new()
    } else {
        vec![text_segment(&item.title)]
    };
    json!({
        "parent": { "database_id": database_id },
        "properties": {
            TITLE_PROPERTY: { "title": title },
            HOOK_PROPERTY: { "rich_text": rich_text(&item.hook) },
            DESCRIPTION_PROPERTY: { "rich_text": rich_text(&item.description) },
            STATUS_PROPERTY: {
                "select": { "name": ItemStatus::Ready.select_name() }
            }
        }
    })
}

fn rich_text(text: &str) -> Vec<Value> {
    split_text(text, NOTION_TEXT_LIMIT)
        .iter()
        .map(|part| text_segment(part))
        .collect()
}

fn text_segment(content: &str) -> Value {
    json!({ "text": { "content": content } })
}

pub(super) fn item_from_page(page: &Value) -> Result<Item, StoreError> {
    let id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Decode("page without id".to_string()))?
        .to_string();
    let properties = page
        .get("properties")
        .ok_or_else(|| StoreError::Decode(format!("page {} without properties", id)))?;

    let status_name = properties
        .get(STATUS_PROPERTY)
        .and_then(|p| p.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let status = ItemStatus::from_select_name(status_name).ok_or_else(|| {
        StoreError::Decode(format!("page {} has unknown status {:?}", id, status_name))
    })?;

    Ok(Item {
        title: joined_text(properties, TITLE_PROPERTY, "title"),
        hook: joined_text(properties, HOOK_PROPERTY, "rich_text"),
        description: joined_text(properties, DESCRIPTION_PROPERTY, "rich_text"),
        status,
        id,
    })
}

fn joined_text(properties: &Value, name: &str, kind: &str) -> String {
    let Some(segments) = properties
        .get(name)
        .and_then(|p| p.get(kind))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    segments
        .iter()
        .filter_map(|segment| {
            segment
                .get("text")
                .and_then(|t| t.get("content"))
                .or_else(|| segment.get("plain_text"))
                .and_then(Value::as_str)
        })
        .collect()
}
