use serde_json::{json, Value};

use super::Tool;

/// Name-indexed set of tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tool this server exposes.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(super::execute::ExecuteCodeTool));
        registry.register(Box::new(super::pii::SanitizePiiTool));
        registry.register(Box::new(super::pii::RestorePiiTool));
        registry.register(Box::new(super::workspace::ReadWorkspaceFileTool));
        registry.register(Box::new(super::workspace::WriteWorkspaceFileTool));
        registry.register(Box::new(super::workspace::ListWorkspaceFilesTool));
        registry.register(Box::new(super::workspace::DeleteWorkspaceFileTool));
        registry.register(Box::new(super::skills::SaveSkillTool));
        registry.register(Box::new(super::skills::LoadSkillTool));
        registry.register(Box::new(super::skills::ListSkillsTool));
        registry.register(Box::new(super::discovery::SearchToolsTool));
        registry.register(Box::new(super::discovery::GetToolDefinitionTool));
        registry.register(Box::new(super::discovery::ListToolCategoriesTool));
        registry.register(Box::new(super::execute::ExecutionStatsTool));
        registry
    }

    /// Adds a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Entries for a `tools/list` response.
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.parameters_schema(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_tools_are_registered() {
        let registry = ToolRegistry::with_builtin_tools();
        assert_eq!(registry.len(), 14);
        for name in [
            "execute_code",
            "sanitize_pii",
            "restore_pii",
            "read_workspace_file",
            "write_workspace_file",
            "list_workspace_files",
            "delete_workspace_file",
            "save_skill",
            "load_skill",
            "list_skills",
            "search_tools",
            "get_tool_definition",
            "list_tool_categories",
            "get_execution_stats",
        ] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_tool_definitions_have_schemas() {
        let registry = ToolRegistry::with_builtin_tools();
        let defs = registry.tool_definitions();
        let names: HashSet<_> = defs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names.len(), defs.len());
        for def in &defs {
            assert!(!def["description"].as_str().unwrap().is_empty());
            assert_eq!(def["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(crate::tools::pii::SanitizePiiTool));
        registry.register(Box::new(crate::tools::pii::SanitizePiiTool));
        assert_eq!(registry.len(), 1);
    }
}
