//! Action catalogue: the read-only inventory of plugin actions a pipeline
//! run may reference.
//!
//! The catalogue is supplied per run and never mutated by the core. It
//! drives three consumers: the Stage-1 designer prompt (condensed summary),
//! the validation gates (existence and required-parameter checks), and the
//! execution governor (tool specs).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::llm::ToolSpec;

// ---------------------------------------------------------------------------
// Catalogue types
// ---------------------------------------------------------------------------

/// The full catalogue: plugin key -> plugin spec.
///
/// Serialized transparently as the plain map, matching the
/// `{plugin_key -> {description, actions}}` wire shape. `BTreeMap` keeps
/// summaries and tool listings deterministically ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionCatalog {
    pub plugins: BTreeMap<String, PluginSpec>,
}

/// One plugin's description and actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
}

/// One action's contract: what it needs and what it yields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub output_fields: Vec<String>,
    /// Full JSON-schema-ish parameter description, used verbatim by the
    /// repair loop and the governor tool specs.
    #[serde(default)]
    pub parameters_schema: Value,
}

impl ActionCatalog {
    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    pub fn has_action(&self, plugin: &str, action: &str) -> bool {
        self.plugins
            .get(plugin)
            .is_some_and(|p| p.actions.contains_key(action))
    }

    pub fn action_spec(&self, plugin: &str, action: &str) -> Option<&ActionSpec> {
        self.plugins.get(plugin)?.actions.get(action)
    }

    /// Condensed one-line-per-action summary for the designer prompt.
    ///
    /// Shape: `plugin.action -- required: [a, b]; outputs: [x, y]`.
    pub fn condensed_summary(&self) -> String {
        let mut lines = Vec::new();
        for (plugin_key, plugin) in &self.plugins {
            if !plugin.description.is_empty() {
                lines.push(format!("# {plugin_key}: {}", plugin.description));
            }
            for (action_name, action) in &plugin.actions {
                lines.push(format!(
                    "{plugin_key}.{action_name} -- required: [{}]; outputs: [{}]",
                    action.required_params.join(", "),
                    action.output_fields.join(", "),
                ));
            }
        }
        lines.join("\n")
    }

    /// Tool specs for the governor: one tool per catalogued action, named
    /// `plugin.action`.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = Vec::new();
        for (plugin_key, plugin) in &self.plugins {
            for (action_name, action) in &plugin.actions {
                let input_schema = if action.parameters_schema.is_object() {
                    action.parameters_schema.clone()
                } else {
                    json!({
                        "type": "object",
                        "required": action.required_params,
                    })
                };
                specs.push(ToolSpec {
                    name: format!("{plugin_key}.{action_name}"),
                    description: action.description.clone(),
                    input_schema,
                });
            }
        }
        specs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> ActionCatalog {
        let mut actions = BTreeMap::new();
        actions.insert(
            "search_emails".to_string(),
            ActionSpec {
                description: "Search the mailbox".to_string(),
                required_params: vec!["query".to_string(), "max_results".to_string()],
                output_fields: vec!["emails".to_string(), "count".to_string()],
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "max_results": {"type": "integer"}
                    },
                    "required": ["query", "max_results"]
                }),
            },
        );
        let mut plugins = BTreeMap::new();
        plugins.insert(
            "google-mail".to_string(),
            PluginSpec {
                description: "Gmail access".to_string(),
                actions,
            },
        );
        ActionCatalog { plugins }
    }

    #[test]
    fn test_lookups() {
        let catalog = sample_catalog();
        assert!(catalog.has_plugin("google-mail"));
        assert!(!catalog.has_plugin("slack"));
        assert!(catalog.has_action("google-mail", "search_emails"));
        assert!(!catalog.has_action("google-mail", "send_email"));
        let spec = catalog.action_spec("google-mail", "search_emails").unwrap();
        assert_eq!(spec.required_params, vec!["query", "max_results"]);
    }

    #[test]
    fn test_transparent_wire_shape() {
        let catalog = sample_catalog();
        let v = serde_json::to_value(&catalog).unwrap();
        // Serializes as the plain plugin map, no wrapper key
        assert!(v.get("google-mail").is_some());
        assert!(v.get("plugins").is_none());
        let parsed: ActionCatalog = serde_json::from_value(v).unwrap();
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn test_condensed_summary_lists_params_and_outputs() {
        let summary = sample_catalog().condensed_summary();
        assert!(summary.contains("google-mail.search_emails"));
        assert!(summary.contains("required: [query, max_results]"));
        assert!(summary.contains("outputs: [emails, count]"));
    }

    #[test]
    fn test_tool_specs_use_dotted_names() {
        let specs = sample_catalog().tool_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "google-mail.search_emails");
        assert_eq!(specs[0].input_schema["required"][0], "query");
    }

    #[test]
    fn test_tool_specs_fall_back_when_schema_missing() {
        let mut catalog = sample_catalog();
        catalog
            .plugins
            .get_mut("google-mail")
            .unwrap()
            .actions
            .get_mut("search_emails")
            .unwrap()
            .parameters_schema = Value::Null;
        let specs = catalog.tool_specs();
        assert_eq!(specs[0].input_schema["type"], "object");
        assert_eq!(specs[0].input_schema["required"][1], "max_results");
    }
}
