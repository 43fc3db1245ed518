use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::schema::{property_text, Properties, PropertySpec};
use crate::{Block, NotionError, RemoteStore};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPage {
    pub id: String,
    pub properties: Properties,
}

#[derive(Debug, Default)]
struct MemoryState {
    property_types: BTreeMap<String, String>,
    pages: Vec<MemoryPage>,
    children: BTreeMap<String, Vec<JsonValue>>,
    next_id: usize,
}

impl MemoryState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-process store with Notion's update-merges-properties semantics. Used by tests and
/// dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    stale_queries: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties<'a>(properties: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.property_types = properties
                .into_iter()
                .map(|(name, kind)| (name.to_string(), kind.to_string()))
                .collect();
        }
        store
    }

    /// Key lookups never see any page, like a search index that has not caught up.
    pub fn with_stale_queries(mut self) -> Self {
        self.stale_queries = true;
        self
    }

    pub fn pages(&self) -> Vec<MemoryPage> {
        self.state
            .lock()
            .map(|state| state.pages.clone())
            .unwrap_or_default()
    }

    pub fn property_types(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .map(|state| state.property_types.clone())
            .unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, NotionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NotionError::Unexpected("memory store lock poisoned".into()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn database_properties(&self) -> Result<BTreeMap<String, String>, NotionError> {
        self.with_state(|state| state.property_types.clone())
    }

    async fn add_properties(&self, additions: &[PropertySpec]) -> Result<(), NotionError> {
        self.with_state(|state| {
            for spec in additions {
                state
                    .property_types
                    .entry(spec.name.to_string())
                    .or_insert_with(|| spec.kind.as_str().to_string());
            }
        })
    }

    async fn find_page_by_key(
        &self,
        key_property: &str,
        key: &str,
    ) -> Result<Option<String>, NotionError> {
        if self.stale_queries {
            return Ok(None);
        }
        self.with_state(|state| {
            state
                .pages
                .iter()
                .find(|page| {
                    page.properties
                        .get(key_property)
                        .map(|value| property_text(value) == key)
                        .unwrap_or(false)
                })
                .map(|page| page.id.clone())
        })
    }

    async fn create_page(&self, properties: &Properties) -> Result<String, NotionError> {
        self.with_state(|state| {
            if let Some(unknown) = properties
                .keys()
                .find(|name| !state.property_types.contains_key(*name))
            {
                return Err(NotionError::Rejected(format!(
                    "{unknown} is not a property that exists"
                )));
            }
            let id = state.allocate_id("page");
            state.pages.push(MemoryPage {
                id: id.clone(),
                properties: properties.clone(),
            });
            Ok(id)
        })?
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &Properties,
    ) -> Result<(), NotionError> {
        self.with_state(|state| {
            let page = state
                .pages
                .iter_mut()
                .find(|page| page.id == page_id)
                .ok_or_else(|| NotionError::Rejected(format!("page {page_id} not found")))?;
            for (name, value) in properties {
                page.properties.insert(name.clone(), value.clone());
            }
            Ok(())
        })?
    }

    async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError> {
        self.with_state(|state| {
            state
                .children
                .get(block_id)
                .map(|blocks| blocks.iter().filter_map(Block::from_json).collect())
                .unwrap_or_default()
        })
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), NotionError> {
        self.with_state(|state| {
            for blocks in state.children.values_mut() {
                blocks.retain(|block| block.get("id").and_then(JsonValue::as_str) != Some(block_id));
            }
            state.children.remove(block_id);
        })
    }

    async fn append_children(
        &self,
        block_id: &str,
        children: &[JsonValue],
    ) -> Result<(), NotionError> {
        self.with_state(|state| {
            for child in children {
                let mut child = child.clone();
                let id = state.allocate_id("block");
                if let Some(object) = child.as_object_mut() {
                    object.insert("id".into(), JsonValue::String(id));
                }
                state
                    .children
                    .entry(block_id.to_string())
                    .or_default()
                    .push(child);
            }
        })
    }
}
