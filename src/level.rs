//! Level file loader
//!
//! A level document is a JSON object with three kinds of top-level keys:
//!
//! - `universal_nodes`: nodes active in every phase
//! - `phase<N>`: a phase with its own `nodes`, in document order
//! - `entity_list`: the entities the player may name
//!
//! Node registry order is universal nodes first, then each phase's nodes.

use crate::model::{DuplicateId, EntityRecord, EntityRegistry, NodeRecord, NodeRegistry};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    /// Top-level keys naming a phase: `phase1`, `phase2`, ...
    static ref PHASE_KEY: Regex = Regex::new(r"^phase\d+$").unwrap();
}

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("failed to read level file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("level file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} must be a JSON object")]
    NotAnObject { what: String },

    #[error("node '{node}' is missing required field '{field}'")]
    MissingField { node: String, field: &'static str },

    #[error("node '{node}': field '{field}' must be a string")]
    InvalidField { node: String, field: &'static str },

    #[error("entity '{id}' is malformed: {source}")]
    Entity {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Duplicate(#[from] DuplicateId),
}

/// One phase of a level
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub id: String,
    pub name: Option<String>,
    /// Node ids whose proof completes the phase
    pub completion_nodes: Vec<String>,
    pub depends_on: Option<Value>,
    pub hidden: bool,
}

/// A parsed level: node and entity registries plus phase metadata
#[derive(Debug, Clone, Default)]
pub struct Level {
    pub nodes: NodeRegistry,
    pub entities: EntityRegistry,
    pub phases: Vec<PhaseRecord>,
}

#[derive(Deserialize)]
struct EntityEntry {
    name: String,
    #[serde(default)]
    alias: Vec<String>,
    #[serde(default)]
    prompt: Option<String>,
}

impl Level {
    /// Load a level from a file on disk
    pub fn load(path: &Path) -> Result<Self, LevelError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LevelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let level = Self::from_json_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            nodes = level.nodes.len(),
            entities = level.entities.len(),
            phases = level.phases.len(),
            "Loaded level"
        );
        Ok(level)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LevelError> {
        let root: Value = serde_json::from_str(text)?;
        let root = root.as_object().ok_or_else(|| LevelError::NotAnObject {
            what: "level document".to_string(),
        })?;

        let mut level = Level::default();

        if let Some(universal) = root.get("universal_nodes") {
            let nodes = as_object(universal, "universal_nodes")?;
            for (id, body) in nodes {
                level.nodes.insert(parse_node(id, body, None)?)?;
            }
        }

        for (key, value) in root {
            if !PHASE_KEY.is_match(key) {
                continue;
            }
            if value.is_null() {
                tracing::warn!("Phase '{}' is null, skipping", key);
                continue;
            }
            let phase = as_object(value, key)?;
            if let Some(nodes) = phase.get("nodes") {
                for (id, body) in as_object(nodes, &format!("{}.nodes", key))? {
                    level.nodes.insert(parse_node(id, body, Some(key))?)?;
                }
            }
            level.phases.push(parse_phase(key, phase));
        }

        if let Some(entities) = root.get("entity_list") {
            for (id, body) in as_object(entities, "entity_list")? {
                let entry: EntityEntry =
                    serde_json::from_value(body.clone()).map_err(|source| LevelError::Entity {
                        id: id.clone(),
                        source,
                    })?;
                level.entities.insert(EntityRecord {
                    id: id.clone(),
                    name: entry.name,
                    aliases: entry.alias,
                    prompt: entry.prompt,
                })?;
            }
        }

        Ok(level)
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.id == id)
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, LevelError> {
    value.as_object().ok_or_else(|| LevelError::NotAnObject {
        what: what.to_string(),
    })
}

fn optional_string(
    body: &Map<String, Value>,
    node: &str,
    field: &'static str,
) -> Result<Option<String>, LevelError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(LevelError::InvalidField {
            node: node.to_string(),
            field,
        }),
    }
}

fn parse_node(id: &str, body: &Value, phase: Option<&str>) -> Result<NodeRecord, LevelError> {
    let body = as_object(body, &format!("node '{}'", id))?;

    let description =
        optional_string(body, id, "description")?.ok_or_else(|| LevelError::MissingField {
            node: id.to_string(),
            field: "description",
        })?;

    let mut node = match phase {
        Some(phase) => NodeRecord::in_phase(id, phase),
        None => NodeRecord::universal(id),
    };
    node.description = Some(description);
    node.prompt = optional_string(body, id, "prompt")?;
    node.depends_on = body.get("depends_on").filter(|v| !v.is_null()).cloned();
    Ok(node)
}

fn parse_phase(id: &str, body: &Map<String, Value>) -> PhaseRecord {
    PhaseRecord {
        id: id.to_string(),
        name: body.get("name").and_then(Value::as_str).map(String::from),
        completion_nodes: body
            .get("completion_nodes")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        depends_on: body.get("depends_on").filter(|v| !v.is_null()).cloned(),
        hidden: body
            .get("is_hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}
