//! Data carried between the prompt builder, the client and the graph engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// An argument node the model is asked to match against.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    /// Player-facing description
    pub description: Option<String>,
    /// Text written for the model; preferred over `description`
    pub prompt: Option<String>,
    /// Phase that owns the node, `None` for universal nodes
    pub owner_phase: Option<String>,
    pub universal: bool,
    /// Raw prerequisite expression gating this node
    pub depends_on: Option<Value>,
}

impl NodeRecord {
    /// A node visible in every phase
    pub fn universal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            prompt: None,
            owner_phase: None,
            universal: true,
            depends_on: None,
        }
    }

    /// A node scoped to one phase
    pub fn in_phase(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            prompt: None,
            owner_phase: Some(phase.into()),
            universal: false,
            depends_on: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_depends_on(mut self, depends_on: Value) -> Self {
        self.depends_on = Some(depends_on);
        self
    }

    /// A node without an owning phase counts as universal.
    pub fn is_universal(&self) -> bool {
        self.universal || self.owner_phase.is_none()
    }

    /// Whether the node takes part in judgments during `phase`
    pub fn is_active_in(&self, phase: &str) -> bool {
        self.is_universal() || self.owner_phase.as_deref() == Some(phase)
    }
}

/// A named thing the player may mention, with the aliases it goes by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub prompt: Option<String>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            prompt: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

/// Raised when a registry already holds a record with the same id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate id '{0}'")]
pub struct DuplicateId(pub String);

/// Nodes in authored order. Ids are unique.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeRecord) -> Result<(), DuplicateId> {
        if self.get(&node.id).is_some() {
            return Err(DuplicateId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<NodeRecord> for NodeRegistry {
    /// Keeps the first record for each id.
    fn from_iter<T: IntoIterator<Item = NodeRecord>>(iter: T) -> Self {
        let mut registry = Self::new();
        for node in iter {
            if let Err(e) = registry.insert(node) {
                tracing::warn!("Skipping node: {}", e);
            }
        }
        registry
    }
}

/// Entities in authored order. Ids are unique.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: Vec<EntityRecord>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityRecord) -> Result<(), DuplicateId> {
        if self.get(&entity.id).is_some() {
            return Err(DuplicateId(entity.id));
        }
        self.entities.push(entity);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<EntityRecord> for EntityRegistry {
    fn from_iter<T: IntoIterator<Item = EntityRecord>>(iter: T) -> Self {
        let mut registry = Self::new();
        for entity in iter {
            if let Err(e) = registry.insert(entity) {
                tracing::warn!("Skipping entity: {}", e);
            }
        }
        registry
    }
}

/// A model confidence score, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("confidence {0} is outside [0, 1]")]
pub struct ConfidenceOutOfRange(pub f64);

impl TryFrom<f64> for Confidence {
    type Error = ConfidenceOutOfRange;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfidenceOutOfRange(value))
        }
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// The model's judgment of one player statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeResult {
    pub reasoning: String,
    #[serde(default)]
    pub node_confidence: BTreeMap<String, Confidence>,
    #[serde(default)]
    pub partial_match: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_opinion: Option<String>,
}

impl RefereeResult {
    pub fn confidence(&self, node_id: &str) -> Option<f64> {
        self.node_confidence.get(node_id).map(|c| c.value())
    }

    /// Node ids scored at or above `cutoff`, in id order
    pub fn nodes_at_least(&self, cutoff: f64) -> impl Iterator<Item = &str> {
        self.node_confidence
            .iter()
            .filter(move |(_, c)| c.value() >= cutoff)
            .map(|(id, _)| id.as_str())
    }
}

/// Topics the player's statement touched, from a discovery request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    #[serde(default)]
    pub discovered_ids: Vec<String>,
}
