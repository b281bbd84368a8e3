//! Progressive tool discovery over the tool catalog: search summaries,
//! then fetch one full definition.
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolError, ToolOutput};
use crate::catalog::DetailLevel;
use crate::state::AppState;

pub struct SearchToolsTool;

#[async_trait]
impl Tool for SearchToolsTool {
    fn name(&self) -> &str {
        "search_tools"
    }

    fn description(&self) -> &str {
        "Search the tool catalog by keyword. Start with detail_level 'summary' and fetch the \
         full definition of the tools you need with get_tool_definition."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keyword matched against names, descriptions, functions and use cases"
                },
                "category": {
                    "type": "string",
                    "description": "Restrict the search to one category"
                },
                "detail_level": {
                    "type": "string",
                    "enum": ["summary", "full"],
                    "description": "Amount of detail per tool (default: summary)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let query = required_str(&params, "query")?;
        let category = optional_str(&params, "category")?;
        let detail = DetailLevel::parse(optional_str(&params, "detail_level")?.unwrap_or("summary"));

        let tools: Vec<Value> = state
            .catalog
            .search(query, category)
            .iter()
            .map(|t| t.to_json(detail))
            .collect();

        Ok(ToolOutput::ok(json!({
            "query": query,
            "category": category,
            "detail_level": detail.as_str(),
            "count": tools.len(),
            "tools": tools,
        })))
    }
}

pub struct GetToolDefinitionTool;

#[async_trait]
impl Tool for GetToolDefinitionTool {
    fn name(&self) -> &str {
        "get_tool_definition"
    }

    fn description(&self) -> &str {
        "Full definition of one catalog tool: description, server, functions and use cases."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Tool name as returned by search_tools"
                },
                "category": {
                    "type": "string",
                    "description": "Category to look in (default: all)"
                }
            },
            "required": ["tool_name"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = required_str(&params, "tool_name")?;
        let category = optional_str(&params, "category")?;
        Ok(match state.catalog.get(name, category) {
            Ok(definition) => ToolOutput::ok(definition),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct ListToolCategoriesTool;

#[async_trait]
impl Tool for ListToolCategoriesTool {
    fn name(&self) -> &str {
        "list_tool_categories"
    }

    fn description(&self) -> &str {
        "List the catalog categories with their descriptions and tool counts."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::ok(json!({
            "categories": state.catalog.categories(),
            "total_tools": state.catalog.total_tools(),
            "core_mcps": state.catalog.core_mcps(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG_FILE;
    use crate::tools::test_support;

    fn write_catalog(state: &AppState) {
        let dir = state.config.paths.tools_registry_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let data = json!({
            "categories": {
                "research": {
                    "description": "Research tools",
                    "tools": {
                        "paper_search": {
                            "description": "Search academic papers",
                            "mcp_server": "research-mcp",
                            "functions": ["search", "fetch_pdf"],
                            "use_cases": ["literature review"]
                        }
                    }
                }
            },
            "core_mcps": ["research-mcp"]
        });
        std::fs::write(dir.join(CATALOG_FILE), data.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_search_summary_and_full() {
        let (_dir, state) = test_support::state();
        write_catalog(&state);

        let output = SearchToolsTool
            .execute(json!({"query": "PAPER"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["count"], 1);
        assert_eq!(output.value["detail_level"], "summary");
        assert_eq!(output.value["category"], Value::Null);
        assert!(output.value["tools"][0].get("functions").is_none());

        let output = SearchToolsTool
            .execute(json!({"query": "pdf", "detail_level": "full"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["tools"][0]["functions"], json!(["search", "fetch_pdf"]));
    }

    #[tokio::test]
    async fn test_get_definition_and_categories() {
        let (_dir, state) = test_support::state();
        write_catalog(&state);

        let output = GetToolDefinitionTool
            .execute(json!({"tool_name": "paper_search"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["category"], "research");

        let output = GetToolDefinitionTool
            .execute(json!({"tool_name": "nope"}), &state)
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["kind"], "not_found");

        let output = ListToolCategoriesTool.execute(json!({}), &state).await.unwrap();
        assert_eq!(output.value["categories"]["research"]["tool_count"], 1);
        assert_eq!(output.value["total_tools"], 1);
        assert_eq!(output.value["core_mcps"], json!(["research-mcp"]));
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let (_dir, state) = test_support::state();
        let output = SearchToolsTool
            .execute(json!({"query": "anything"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["count"], 0);
        assert_eq!(output.value["tools"], json!([]));
    }
}
