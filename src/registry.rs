//! In-memory tag registry shared between the poller and the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{TagHubConfig, TagType};

/// A named logical value bound to one device register.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub name: String,
    pub address: Option<u16>,
    pub tag_type: TagType,
    /// Current value; absent until the first poll or operator write
    pub value: Option<u16>,
    /// Unix millis of the last update; absent until the first update
    pub updated_at: Option<i64>,
}

/// Registry of all configured tags.
///
/// The poll scheduler writes through [`TagRegistry::update_from_poll`]; the
/// gateway reads, and writes only through [`TagRegistry::set`]. Both paths
/// mutate the same map, so the map sits behind a lock.
pub struct TagRegistry {
    tags: RwLock<HashMap<String, Tag>>,
    /// address -> tag name, built once from configuration
    by_address: HashMap<u16, String>,
}

/// Shared handle to the registry.
pub type SharedRegistry = Arc<TagRegistry>;

impl TagRegistry {
    /// Build the registry from configuration. Every configured tag starts
    /// without a value.
    pub fn from_config(config: &TagHubConfig) -> Self {
        let mut tags = HashMap::with_capacity(config.tags.len());
        let mut by_address = HashMap::new();

        for (name, tag_config) in &config.tags {
            if let Some(address) = tag_config.address {
                by_address.insert(address, name.clone());
            }
            tags.insert(
                name.clone(),
                Tag {
                    name: name.clone(),
                    address: tag_config.address,
                    tag_type: tag_config.tag_type,
                    value: None,
                    updated_at: None,
                },
            );
        }

        Self {
            tags: RwLock::new(tags),
            by_address,
        }
    }

    /// Current state of one tag, or `None` if the name is not configured.
    pub fn get(&self, name: &str) -> Option<Tag> {
        self.tags.read().get(name).cloned()
    }

    /// Operator write path: set a tag's value by name.
    ///
    /// Returns the updated tag, or `None` if the name is not configured;
    /// nothing is created implicitly.
    pub fn set(&self, name: &str, value: u16, timestamp: i64) -> Option<Tag> {
        let mut tags = self.tags.write();
        let tag = tags.get_mut(name)?;
        tag.value = Some(value);
        tag.updated_at = Some(timestamp);
        Some(tag.clone())
    }

    /// All configured tag names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Poll write path: store a value read from the bus for whatever tag is
    /// bound to `address`. Addresses with no bound tag are silently ignored;
    /// coalesced reads legitimately cover gaps between configured addresses.
    pub fn update_from_poll(&self, address: u16, value: u16, timestamp: i64) {
        if let Some(name) = self.by_address.get(&address) {
            let mut tags = self.tags.write();
            if let Some(tag) = tags.get_mut(name) {
                tag.value = Some(value);
                tag.updated_at = Some(timestamp);
            }
        }
    }

    /// Name of the tag bound to an address, if any.
    pub fn name_for_address(&self, address: u16) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    /// Snapshot of every tag's current value, by name.
    pub fn snapshot(&self) -> Vec<Tag> {
        let tags = self.tags.read();
        let mut all: Vec<Tag> = tags.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
