//! Tag gateway: the operations the HTTP surface serves.
//!
//! The gateway answers every external request from the shared registry and
//! event cache; it never talks to the transport.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::config::{TagHubConfig, TagType};
use crate::events::{Event, SharedEvents};
use crate::registry::{SharedRegistry, Tag};

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),
    #[error("Unknown tag: {0}")]
    UnknownTag(String),
}

/// Read/write facade over the registry and event cache.
///
/// "Handlers" are the configured poll groups; each exposes its own tag list
/// and configuration slice. Existence of the tag is the only validation
/// performed on writes.
pub struct TagGateway {
    registry: SharedRegistry,
    events: SharedEvents,
    config: TagHubConfig,
    handlers: Vec<TagType>,
}

impl TagGateway {
    pub fn new(registry: SharedRegistry, events: SharedEvents, config: TagHubConfig) -> Self {
        let handlers = config.present_groups();
        Self {
            registry,
            events,
            config,
            handlers,
        }
    }

    /// Names of all configured handlers.
    pub fn handlers(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|t| t.as_str()).collect()
    }

    fn resolve_handler(&self, name: &str) -> Result<TagType, GatewayError> {
        TagType::from_str_opt(name)
            .filter(|t| self.handlers.contains(t))
            .ok_or_else(|| GatewayError::UnknownHandler(name.to_string()))
    }

    /// Tag names belonging to one handler.
    pub fn handler_tags(&self, handler: &str) -> Result<Vec<String>, GatewayError> {
        let tag_type = self.resolve_handler(handler)?;
        Ok(self.config.group_tag_names(tag_type))
    }

    /// Current state of one tag within a handler.
    pub fn get_tag(&self, handler: &str, tag: &str) -> Result<Tag, GatewayError> {
        let tag_type = self.resolve_handler(handler)?;
        self.registry
            .get(tag)
            .filter(|t| t.tag_type == tag_type)
            .ok_or_else(|| GatewayError::UnknownTag(tag.to_string()))
    }

    /// Operator write: set one tag within a handler, returning its new state.
    pub fn set_tag(&self, handler: &str, tag: &str, value: u16) -> Result<Tag, GatewayError> {
        // Resolve first so an unknown tag mutates nothing
        self.get_tag(handler, tag)?;
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.registry
            .set(tag, value, timestamp)
            .ok_or_else(|| GatewayError::UnknownTag(tag.to_string()))
    }

    /// Operator write by bare tag name, for the bulk `setTag` action.
    pub fn set_tag_by_name(&self, tag: &str, value: u16) -> Result<Tag, GatewayError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.registry
            .set(tag, value, timestamp)
            .ok_or_else(|| GatewayError::UnknownTag(tag.to_string()))
    }

    /// Read-only reflection of one handler's static configuration.
    pub fn handler_config(&self, handler: &str) -> Result<Value, GatewayError> {
        let tag_type = self.resolve_handler(handler)?;
        let tags: BTreeMap<&String, &crate::config::TagConfig> = self
            .config
            .tags
            .iter()
            .filter(|(_, tag)| tag.tag_type == tag_type)
            .collect();
        Ok(json!({
            "server": self.config.server,
            "tags": tags,
        }))
    }

    /// Snapshot of the event cache, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.list()
    }

    /// Every tag's current value as a flat name -> value object (`getJson`).
    pub fn all_tags_json(&self) -> Value {
        let mut tags = serde_json::Map::new();
        for tag in self.registry.snapshot() {
            tags.insert(tag.name, json!(tag.value));
        }
        json!({ "tags": tags })
    }

    /// Tags grouped by the prefix before the first underscore in the name
    /// (`listTags`). A name without an underscore groups under itself.
    pub fn grouped_tags(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        let mut grouped: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for tag in self.registry.snapshot() {
            let (prefix, rest) = match tag.name.split_once('_') {
                Some((prefix, rest)) => (prefix.to_string(), rest.to_string()),
                None => (tag.name.clone(), tag.name.clone()),
            };
            grouped.entry(prefix).or_default().insert(rest, json!(tag.value));
        }
        grouped
    }
}
