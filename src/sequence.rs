use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The ordered list of activities a learner works through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySequence {
    pub items: Vec<Item>,
    pub node_collection_url: String,
    pub sequence_id: String,
}

impl ActivitySequence {
    pub fn new(
        sequence_id: impl Into<String>,
        node_collection_url: impl Into<String>,
        items: Vec<Item>,
    ) -> Self {
        Self {
            items,
            node_collection_url: node_collection_url.into(),
            sequence_id: sequence_id.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: Map::new(),
        }
    }
}

/// What to render for one traversal of an item, and where its result goes.
///
/// Posted verbatim to the surface, so unknown fields are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceNode {
    pub id: String,
    pub index: usize,
    pub item_id: String,
    pub launch_uri: String,
    pub result_collection_url: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Latest fetched node per item, indexed by node id.
///
/// Fetching a node for an item replaces whatever was kept for that item;
/// older nodes are forgotten.
#[derive(Debug, Default)]
pub struct NodeIndex {
    by_item: HashMap<String, SequenceNode>,
    item_by_node: HashMap<String, String>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `node` as the current node of its item. Returns the node it replaced.
    pub fn insert(&mut self, node: SequenceNode) -> Option<SequenceNode> {
        let replaced = self.by_item.remove(&node.item_id);
        if let Some(old) = &replaced {
            self.item_by_node.remove(&old.id);
        }
        self.item_by_node.insert(node.id.clone(), node.item_id.clone());
        self.by_item.insert(node.item_id.clone(), node);
        replaced
    }

    pub fn get(&self, node_id: &str) -> Option<&SequenceNode> {
        self.item_by_node
            .get(node_id)
            .and_then(|item_id| self.by_item.get(item_id))
    }

    pub fn for_item(&self, item_id: &str) -> Option<&SequenceNode> {
        self.by_item.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }
}
