//! Read-only catalog of topics, scripted rounds and tree nodes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::topic::{ScriptedRound, Topic, TreeNode};

/// Shared reference to a catalog
pub type SharedCatalog = Arc<dyn TopicCatalog>;

/// External content catalog.
#[async_trait]
pub trait TopicCatalog: Send + Sync {
    /// Fetch a topic by id.
    async fn get_topic(&self, topic_id: &str) -> EngineResult<Topic>;

    /// Fetch all scripted rounds for a topic (any order).
    async fn get_scripted_rounds(&self, topic_id: &str) -> EngineResult<Vec<ScriptedRound>>;

    /// Fetch the full decision tree for a topic.
    async fn get_tree_nodes(&self, topic_id: &str) -> EngineResult<Vec<TreeNode>>;
}

/// Serialized catalog content, as stored in a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub scripted_rounds: Vec<ScriptedRound>,
    #[serde(default)]
    pub tree_nodes: Vec<TreeNode>,
}

/// Catalog held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    topics: HashMap<String, Topic>,
    rounds: HashMap<String, Vec<ScriptedRound>>,
    nodes: HashMap<String, Vec<TreeNode>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from deserialized catalog data.
    pub fn from_data(data: CatalogData) -> Self {
        let mut catalog = Self::new();
        for topic in data.topics {
            catalog = catalog.with_topic(topic);
        }
        for round in data.scripted_rounds {
            catalog
                .rounds
                .entry(round.topic_id.clone())
                .or_default()
                .push(round);
        }
        for node in data.tree_nodes {
            catalog
                .nodes
                .entry(node.topic_id.clone())
                .or_default()
                .push(node);
        }
        catalog
    }

    /// Parse a JSON catalog document.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let data: CatalogData = serde_json::from_str(json)?;
        Ok(Self::from_data(data))
    }

    /// Load a JSON catalog file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&json)
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topics.insert(topic.id.clone(), topic);
        self
    }

    pub fn with_rounds(mut self, topic_id: &str, rounds: Vec<ScriptedRound>) -> Self {
        self.rounds.insert(topic_id.to_string(), rounds);
        self
    }

    pub fn with_tree(mut self, topic_id: &str, nodes: Vec<TreeNode>) -> Self {
        self.nodes.insert(topic_id.to_string(), nodes);
        self
    }

    /// Create a shared reference to this catalog
    pub fn shared(self) -> SharedCatalog {
        Arc::new(self)
    }
}

#[async_trait]
impl TopicCatalog for InMemoryCatalog {
    async fn get_topic(&self, topic_id: &str) -> EngineResult<Topic> {
        self.topics
            .get(topic_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("topic", topic_id))
    }

    async fn get_scripted_rounds(&self, topic_id: &str) -> EngineResult<Vec<ScriptedRound>> {
        Ok(self.rounds.get(topic_id).cloned().unwrap_or_default())
    }

    async fn get_tree_nodes(&self, topic_id: &str) -> EngineResult<Vec<TreeNode>> {
        Ok(self.nodes.get(topic_id).cloned().unwrap_or_default())
    }
}
