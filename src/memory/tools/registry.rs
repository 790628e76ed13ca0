//! Tool definitions and dispatch for the direct memory surface.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::memory::core::ids::GroupId;
use crate::memory::tools::direct::MemoryTools;

/// `add_memory_link`
pub const ADD_MEMORY_LINK: &str = "add_memory_link";
/// `get_memory_object`
pub const GET_MEMORY_OBJECT: &str = "get_memory_object";
/// `invalidate_memory_link`
pub const INVALIDATE_MEMORY_LINK: &str = "invalidate_memory_link";
/// `update_memory_object`
pub const UPDATE_MEMORY_OBJECT: &str = "update_memory_object";
/// `delete_memory_object`
pub const DELETE_MEMORY_OBJECT: &str = "delete_memory_object";

/// A tool as advertised to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

#[derive(Deserialize)]
struct AddLinkArgs {
    from: String,
    relation: String,
    to: String,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct GetObjectArgs {
    name: String,
}

#[derive(Deserialize)]
struct InvalidateLinkArgs {
    from: String,
    relation: String,
    to: String,
}

#[derive(Deserialize)]
struct UpdateObjectArgs {
    name: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
}

#[derive(Deserialize)]
struct DeleteObjectArgs {
    name: String,
    #[serde(default)]
    cascade: bool,
}

/// The five memory tools.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ADD_MEMORY_LINK.to_string(),
            description: "Store a fact directly in long-term memory as `from -[relation]-> to`. \
                          Creates the entities if they do not exist."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from": {"type": "string", "description": "Source entity name"},
                    "relation": {"type": "string", "description": "Relationship, e.g. uses"},
                    "to": {"type": "string", "description": "Target entity name"},
                    "summary": {"type": "string", "description": "Optional sentence describing the fact"}
                },
                "required": ["from", "relation", "to"]
            }),
        },
        ToolDefinition {
            name: GET_MEMORY_OBJECT.to_string(),
            description: "Show what memory knows about an entity and its current relationships."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Entity name"}
                },
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: INVALIDATE_MEMORY_LINK.to_string(),
            description: "Mark a fact as no longer true. The history is kept.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from": {"type": "string", "description": "Source entity name"},
                    "relation": {"type": "string", "description": "Relationship"},
                    "to": {"type": "string", "description": "Target entity name"}
                },
                "required": ["from", "relation", "to"]
            }),
        },
        ToolDefinition {
            name: UPDATE_MEMORY_OBJECT.to_string(),
            description: "Replace an entity's summary and/or set its type.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Entity name"},
                    "summary": {"type": "string", "description": "New summary"},
                    "entity_type": {"type": "string", "description": "Entity type name, e.g. Person"}
                },
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: DELETE_MEMORY_OBJECT.to_string(),
            description: "Permanently delete an entity. Irreversible; prefer invalidate_memory_link \
                          to retire a fact."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Entity name"},
                    "cascade": {"type": "boolean", "description": "Also delete its relationships", "default": false}
                },
                "required": ["name"]
            }),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|err| format!("Invalid arguments for {tool}: {err}"))
}

/// Run tool `name` with JSON `args` in `group`. Always returns a status string.
pub async fn dispatch(tools: &MemoryTools, group: &GroupId, name: &str, args: Value) -> String {
    debug!(tool = name, "Dispatching memory tool");
    match name {
        ADD_MEMORY_LINK => match parse_args::<AddLinkArgs>(name, args) {
            Ok(a) => {
                tools
                    .add_fact_directly(group, &a.from, &a.relation, &a.to, a.summary.as_deref())
                    .await
            }
            Err(status) => status,
        },
        GET_MEMORY_OBJECT => match parse_args::<GetObjectArgs>(name, args) {
            Ok(a) => tools.get_entity_details(group, &a.name).await,
            Err(status) => status,
        },
        INVALIDATE_MEMORY_LINK => match parse_args::<InvalidateLinkArgs>(name, args) {
            Ok(a) => tools.invalidate_fact(group, &a.from, &a.relation, &a.to).await,
            Err(status) => status,
        },
        UPDATE_MEMORY_OBJECT => match parse_args::<UpdateObjectArgs>(name, args) {
            Ok(a) => {
                tools
                    .update_entity(group, &a.name, a.summary.as_deref(), a.entity_type.as_deref())
                    .await
            }
            Err(status) => status,
        },
        DELETE_MEMORY_OBJECT => match parse_args::<DeleteObjectArgs>(name, args) {
            Ok(a) => tools.hard_delete_entity(group, &a.name, a.cascade).await,
            Err(status) => status,
        },
        other => format!("Unknown tool '{other}'."),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::core::entity_types::EntityTypeRegistry;
    use crate::memory::storage::graph_store::GraphConnection;
    use crate::memory::testing::{HashEmbedder, TEST_DIMS, memory_store, test_group};

    async fn tools() -> MemoryTools {
        MemoryTools::new(
            GraphConnection::connected(memory_store().await),
            Arc::new(HashEmbedder::new(TEST_DIMS)),
            Arc::new(EntityTypeRegistry::builtin().unwrap()),
        )
    }

    #[test]
    fn five_tools_with_required_fields() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                ADD_MEMORY_LINK,
                GET_MEMORY_OBJECT,
                INVALIDATE_MEMORY_LINK,
                UPDATE_MEMORY_OBJECT,
                DELETE_MEMORY_OBJECT
            ]
        );
        assert!(defs.iter().all(|d| d.parameters["required"].is_array()));
    }

    #[tokio::test]
    async fn dispatch_round_trip() {
        let tools = tools().await;
        let group = test_group();

        let added = dispatch(
            &tools,
            &group,
            ADD_MEMORY_LINK,
            json!({"from": "A", "relation": "uses", "to": "B"}),
        )
        .await;
        assert!(added.starts_with("Added fact"));

        let details = dispatch(&tools, &group, GET_MEMORY_OBJECT, json!({"name": "A"})).await;
        assert!(details.contains("uses -> B"));

        let deleted = dispatch(
            &tools,
            &group,
            DELETE_MEMORY_OBJECT,
            json!({"name": "A", "cascade": true}),
        )
        .await;
        assert!(deleted.starts_with("Permanently deleted"));
    }

    #[tokio::test]
    async fn bad_arguments_and_unknown_tools_are_strings() {
        let tools = tools().await;
        let group = test_group();
        let bad = dispatch(&tools, &group, ADD_MEMORY_LINK, json!({"from": "A"})).await;
        assert!(bad.starts_with("Invalid arguments for add_memory_link"));
        let unknown = dispatch(&tools, &group, "forget_everything", json!({})).await;
        assert_eq!(unknown, "Unknown tool 'forget_everything'.");
    }
}
