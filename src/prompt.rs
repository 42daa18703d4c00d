//! Prompt construction
//!
//! [`ContextBuilder`] turns the node and entity registries plus the active
//! phase into the text sent to the model. Output is a pure function of its
//! inputs: same registries, same phase, same bytes.

use crate::model::{EntityRegistry, NodeRecord, NodeRegistry};

/// Separates the fixed instruction from the per-request context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n";

/// Used when a node has neither model-facing prompt text nor a description.
pub const FALLBACK_DESCRIPTION: &str = "No description";

const NODE_BLOCK_HEADER: &str = "**Logic nodes (match the statement against each):**";
const ENTITY_BLOCK_HEADER: &str = "**Entities (used for partial_match):**";
const CANDIDATE_BLOCK_HEADER: &str = "**Topics:**";

/// Fixed instruction for referee judgments
pub const REFEREE_INSTRUCTION: &str = r#"You are the referee of a deduction game. Decide whether the player's statement agrees with the scripted arguments listed below.

**Rules (follow strictly):**
1. **No inference**: do not guess what the player might have meant. Judge only what was said.
2. **One by one**: make an independent yes/no decision for every listed node.
3. **Entities first**: check that the entities the player names match the ones in the node description.
4. **Hypotheticals**: ignore framing such as "suppose" or "what if" and judge the core claim.
5. **Format**: reply with exactly one JSON object and nothing else.

**Output format:**
{
  "reasoning": "your step-by-step check",
  "node_confidence": { "node_id": 1.0, "node_id_2": 0.0 },
  "partial_match": { "key": ["keyword"] },
  "user_opinion": "optional one-line summary of the player's claim"
}"#;

/// Fixed instruction for topic discovery
pub const DISCOVERY_INSTRUCTION: &str = r#"Decide whether the player's statement hints at, asks about or touches any of the topics listed below.
A topic counts as discovered when the statement is related to it, even loosely, or names a key object from its description.

**Rules:**
1. **Meaning over wording**: an exact match is not required.
2. **Key nouns**: mentioning a core noun of a topic usually counts.
3. **When unsure, include it.**

**Output format:**
{ "discovered_ids": ["topic_id"] }"#;

/// A composed request: fixed instruction, per-request context and the raw
/// player text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub instruction: String,
    pub context: String,
    pub user_input: String,
}

impl Prompt {
    /// Content of the system message
    pub fn system_message(&self) -> String {
        format!("{}{}{}", self.instruction, CONTEXT_SEPARATOR, self.context)
    }
}

/// Builds prompt text from a level's registries.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder<'a> {
    nodes: &'a NodeRegistry,
    entities: &'a EntityRegistry,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(nodes: &'a NodeRegistry, entities: &'a EntityRegistry) -> Self {
        Self { nodes, entities }
    }

    /// Nodes active in `phase`, in registry order
    pub fn eligible_nodes(&self, phase: &'a str) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        self.nodes.iter().filter(move |n| n.is_active_in(phase))
    }

    /// One `- id: description` line per eligible node, under a header and
    /// followed by a blank line. Empty when no node is eligible.
    pub fn node_block(&self, phase: &str) -> String {
        let lines: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_active_in(phase))
            .map(|n| format!("- {}: {}\n", n.id, node_description(n)))
            .collect();
        if lines.is_empty() {
            return String::new();
        }

        let mut block = String::with_capacity(NODE_BLOCK_HEADER.len() + 64 * lines.len());
        block.push_str(NODE_BLOCK_HEADER);
        block.push('\n');
        for line in lines {
            block.push_str(&line);
        }
        block.push('\n');
        block
    }

    /// A JSON-shaped listing of every entity with its aliases. Empty when
    /// the registry is.
    pub fn entity_block(&self) -> String {
        if self.entities.is_empty() {
            return String::new();
        }

        let entries: Vec<String> = self
            .entities
            .iter()
            .map(|e| {
                let aliases: Vec<String> = e.aliases.iter().map(|a| json_string(a)).collect();
                format!(
                    "  {}: {{ \"name\": {}, \"alias\": [{}] }}",
                    json_string(&e.id),
                    json_string(&e.name),
                    aliases.join(", ")
                )
            })
            .collect();

        let mut block = String::new();
        block.push_str(ENTITY_BLOCK_HEADER);
        block.push_str("\n{\n");
        block.push_str(&entries.join(",\n"));
        block.push_str("\n}\n");
        block
    }

    /// Compose the referee prompt for one player statement
    pub fn referee_prompt(&self, phase: &str, user_input: &str) -> Prompt {
        let mut context = self.node_block(phase);
        context.push_str(&self.entity_block());
        Prompt {
            instruction: REFEREE_INSTRUCTION.to_string(),
            context,
            user_input: user_input.to_string(),
        }
    }

    /// Compose a topic-discovery prompt. `None` when no node in `phase` has
    /// any text to match against.
    pub fn discovery_prompt(&self, phase: &str, user_input: &str) -> Option<Prompt> {
        let lines: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_active_in(phase))
            .filter_map(|n| authored_text(n).map(|text| format!("- {}: {}\n", n.id, text)))
            .collect();
        if lines.is_empty() {
            tracing::debug!(phase, "No discovery candidates");
            return None;
        }

        let mut context = String::from(CANDIDATE_BLOCK_HEADER);
        context.push('\n');
        for line in lines {
            context.push_str(&line);
        }
        Some(Prompt {
            instruction: DISCOVERY_INSTRUCTION.to_string(),
            context,
            user_input: user_input.to_string(),
        })
    }
}

/// Prompt text, then description, then [`FALLBACK_DESCRIPTION`].
pub fn node_description(node: &NodeRecord) -> &str {
    authored_text(node).unwrap_or(FALLBACK_DESCRIPTION)
}

fn authored_text(node: &NodeRecord) -> Option<&str> {
    node.prompt
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| node.description.as_deref().filter(|s| !s.is_empty()))
}

fn json_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityRecord;

    fn registry() -> NodeRegistry {
        [
            NodeRecord::universal("n1").with_description("Universal fact"),
            NodeRecord::in_phase("n2", "phase1")
                .with_description("Shown to player")
                .with_prompt("Written for the model"),
            NodeRecord::in_phase("n3", "phase2").with_description("Other phase"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_phase_filter() {
        let nodes = registry();
        let entities = EntityRegistry::new();
        let builder = ContextBuilder::new(&nodes, &entities);
        let ids: Vec<&str> = builder
            .eligible_nodes("phase1")
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn test_node_block_format() {
        let nodes = registry();
        let entities = EntityRegistry::new();
        let block = ContextBuilder::new(&nodes, &entities).node_block("phase1");
        assert_eq!(
            block,
            format!(
                "{}\n- n1: Universal fact\n- n2: Written for the model\n\n",
                NODE_BLOCK_HEADER
            )
        );
    }

    #[test]
    fn test_description_priority() {
        let empty_prompt = NodeRecord::universal("a")
            .with_prompt("")
            .with_description("desc");
        assert_eq!(node_description(&empty_prompt), "desc");

        let nothing = NodeRecord::universal("b").with_description("");
        assert_eq!(node_description(&nothing), FALLBACK_DESCRIPTION);
    }

    #[test]
    fn test_empty_blocks() {
        let nodes = registry();
        let entities = EntityRegistry::new();
        let builder = ContextBuilder::new(&nodes, &entities);
        assert_eq!(builder.entity_block(), "");

        let only_phase: NodeRegistry = [NodeRecord::in_phase("x", "phase3")].into_iter().collect();
        let builder = ContextBuilder::new(&only_phase, &entities);
        assert_eq!(builder.node_block("phase1"), "");
    }

    #[test]
    fn test_entity_block_escapes_and_lists_aliases() {
        let nodes = NodeRegistry::new();
        let entities: EntityRegistry = [
            EntityRecord::new("butler", "Mr. \"G\"").with_aliases(["Graves", "the butler"]),
            EntityRecord::new("maid", "Ada"),
        ]
        .into_iter()
        .collect();
        let block = ContextBuilder::new(&nodes, &entities).entity_block();
        let expected = format!(
            "{}\n{{\n  \"butler\": {{ \"name\": \"Mr. \\\"G\\\"\", \"alias\": [\"Graves\", \"the butler\"] }},\n  \"maid\": {{ \"name\": \"Ada\", \"alias\": [] }}\n}}\n",
            ENTITY_BLOCK_HEADER
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn test_system_message_layout() {
        let nodes = registry();
        let entities: EntityRegistry = [EntityRecord::new("e", "E")].into_iter().collect();
        let builder = ContextBuilder::new(&nodes, &entities);
        let prompt = builder.referee_prompt("phase2", "The window was forced");

        assert_eq!(prompt.user_input, "The window was forced");
        let expected = format!(
            "{}\n\n---\n{}{}",
            REFEREE_INSTRUCTION,
            builder.node_block("phase2"),
            builder.entity_block()
        );
        assert_eq!(prompt.system_message(), expected);
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let nodes = registry();
        let entities = EntityRegistry::new();
        let builder = ContextBuilder::new(&nodes, &entities);
        assert_eq!(
            builder.referee_prompt("phase1", "x"),
            builder.referee_prompt("phase1", "x")
        );
    }

    #[test]
    fn test_discovery_prompt() {
        let nodes: NodeRegistry = [
            NodeRecord::universal("a").with_description("Bloodstain"),
            NodeRecord::universal("b"),
            NodeRecord::in_phase("c", "phase2").with_description("Graffiti"),
        ]
        .into_iter()
        .collect();
        let entities = EntityRegistry::new();
        let builder = ContextBuilder::new(&nodes, &entities);

        let prompt = builder.discovery_prompt("phase1", "blood?").unwrap();
        assert_eq!(prompt.instruction, DISCOVERY_INSTRUCTION);
        assert_eq!(prompt.context, format!("{}\n- a: Bloodstain\n", CANDIDATE_BLOCK_HEADER));
    }

    #[test]
    fn test_discovery_prompt_without_candidates() {
        let nodes: NodeRegistry = [NodeRecord::universal("b")].into_iter().collect();
        let entities = EntityRegistry::new();
        assert!(ContextBuilder::new(&nodes, &entities)
            .discovery_prompt("phase1", "anything")
            .is_none());
    }
}
