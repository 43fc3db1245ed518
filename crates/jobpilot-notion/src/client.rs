use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jobpilot_storage::{classify_reqwest_error, classify_status, BackoffPolicy, RetryDisposition};
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::schema::{Properties, PropertySpec};
use crate::{Block, NotionError, RemoteStore};

pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";
const APPEND_CHUNK: usize = 100;

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub token: String,
    pub database_id: String,
    pub base_url: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl NotionClientConfig {
    pub fn new(token: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            database_id: database_id.into(),
            base_url: NOTION_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// [`RemoteStore`] over the Notion REST API, bound to one database.
#[derive(Debug, Clone)]
pub struct NotionClient {
    http: reqwest::Client,
    config: NotionClientConfig,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self, NotionError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn database_id(&self) -> &str {
        &self.config.database_id
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, NotionError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let backoff = &self.config.backoff;
        let mut attempt = 0usize;
        loop {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.config.token)
                .header("Notion-Version", NOTION_VERSION);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json().await?);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%status, path, attempt, "notion request throttled or failing; retrying");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let body: JsonValue = resp.json().await.unwrap_or(JsonValue::Null);
                    return Err(api_error(status, &body));
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(NotionError::Http(err));
                }
            }
        }
    }
}

fn api_error(status: StatusCode, body: &JsonValue) -> NotionError {
    let field = |name: &str| {
        body.get(name)
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string()
    };
    NotionError::Api {
        status: status.as_u16(),
        code: field("code"),
        message: field("message"),
    }
}

fn id_of(value: &JsonValue) -> Result<String, NotionError> {
    value
        .get("id")
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| NotionError::Unexpected("response has no `id`".into()))
}

#[async_trait]
impl RemoteStore for NotionClient {
    async fn database_properties(&self) -> Result<BTreeMap<String, String>, NotionError> {
        let path = format!("databases/{}", self.config.database_id);
        let db = self.request(Method::GET, &path, None).await?;
        let properties = db
            .get("properties")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| NotionError::Unexpected("database has no `properties`".into()))?;
        Ok(properties
            .iter()
            .map(|(name, def)| {
                let kind = def.get("type").and_then(JsonValue::as_str).unwrap_or_default();
                (name.clone(), kind.to_string())
            })
            .collect())
    }

    async fn add_properties(&self, additions: &[PropertySpec]) -> Result<(), NotionError> {
        let mut properties = Map::new();
        for spec in additions {
            properties.insert(spec.name.to_string(), spec.kind.definition());
        }
        let path = format!("databases/{}", self.config.database_id);
        self.request(Method::PATCH, &path, Some(&json!({ "properties": properties })))
            .await?;
        Ok(())
    }

    async fn find_page_by_key(
        &self,
        key_property: &str,
        key: &str,
    ) -> Result<Option<String>, NotionError> {
        let path = format!("databases/{}/query", self.config.database_id);
        let body = json!({
            "filter": { "property": key_property, "rich_text": { "equals": key } },
            "page_size": 1
        });
        let found = self.request(Method::POST, &path, Some(&body)).await?;
        let first = found
            .get("results")
            .and_then(JsonValue::as_array)
            .and_then(|results| results.first());
        first.map(id_of).transpose()
    }

    async fn create_page(&self, properties: &Properties) -> Result<String, NotionError> {
        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": properties
        });
        let page = self.request(Method::POST, "pages", Some(&body)).await?;
        id_of(&page)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &Properties,
    ) -> Result<(), NotionError> {
        let path = format!("pages/{page_id}");
        self.request(Method::PATCH, &path, Some(&json!({ "properties": properties })))
            .await?;
        Ok(())
    }

    async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("blocks/{block_id}/children?page_size=100");
            if let Some(cursor) = &cursor {
                path.push_str(&format!("&start_cursor={cursor}"));
            }
            let page = self.request(Method::GET, &path, None).await?;
            if let Some(results) = page.get("results").and_then(JsonValue::as_array) {
                blocks.extend(results.iter().filter_map(Block::from_json));
            }
            let has_more = page.get("has_more").and_then(JsonValue::as_bool).unwrap_or(false);
            cursor = page
                .get("next_cursor")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }
        debug!(block_id, count = blocks.len(), "listed child blocks");
        Ok(blocks)
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), NotionError> {
        let path = format!("blocks/{block_id}");
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn append_children(
        &self,
        block_id: &str,
        children: &[JsonValue],
    ) -> Result<(), NotionError> {
        let path = format!("blocks/{block_id}/children");
        for chunk in children.chunks(APPEND_CHUNK) {
            self.request(Method::PATCH, &path, Some(&json!({ "children": chunk })))
                .await?;
        }
        Ok(())
    }
}
