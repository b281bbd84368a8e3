use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolError, ToolOutput};
use crate::state::AppState;

/// Persists a code snippet under a name so later sessions can reuse it.
pub struct SaveSkillTool;

#[async_trait]
impl Tool for SaveSkillTool {
    fn name(&self) -> &str {
        "save_skill"
    }

    fn description(&self) -> &str {
        "Save a reusable script as a named skill. Saving under an existing name replaces it. \
         Names use letters, digits and underscores, and do not start with a digit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name (e.g. 'summarize_logs')"
                },
                "code": {
                    "type": "string",
                    "description": "Script source"
                },
                "description": {
                    "type": "string",
                    "description": "What the skill does"
                }
            },
            "required": ["name", "code"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = required_str(&params, "name")?;
        let code = required_str(&params, "code")?;
        let description = optional_str(&params, "description")?.unwrap_or("");

        Ok(match state.skills.save(name, code, description) {
            Ok(message) => ToolOutput::ok(json!({"success": true, "message": message})),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct LoadSkillTool;

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        "load_skill"
    }

    fn description(&self) -> &str {
        "Load a saved skill: its code and metadata. Pass the code to execute_code to run it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = required_str(&params, "name")?;
        Ok(match state.skills.load(name) {
            Ok(skill) => ToolOutput::ok(json!({
                "name": skill.name,
                "code": skill.code,
                "metadata": skill.metadata,
            })),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct ListSkillsTool;

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List saved skills with their descriptions."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        Ok(match state.skills.list() {
            Ok(skills) => ToolOutput::ok(json!({
                "count": skills.len(),
                "skills": skills,
            })),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;

    #[test]
    fn test_save_schema() {
        let schema = SaveSkillTool.parameters_schema();
        assert_eq!(schema["required"], json!(["name", "code"]));
        assert_eq!(schema["properties"]["description"]["type"], "string");
    }

    #[tokio::test]
    async fn test_save_load_list() {
        let (_dir, state) = test_support::state();

        let saved = SaveSkillTool
            .execute(
                json!({"name": "double", "code": "result = n * 2", "description": "Doubles n"}),
                &state,
            )
            .await
            .unwrap();
        assert!(!saved.is_error);
        assert_eq!(saved.value["message"], "Skill 'double' saved successfully");

        let loaded = LoadSkillTool
            .execute(json!({"name": "double"}), &state)
            .await
            .unwrap();
        assert_eq!(loaded.value["code"], "result = n * 2");
        assert_eq!(loaded.value["metadata"]["description"], "Doubles n");
        assert_eq!(loaded.value["metadata"]["code_hash"].as_str().unwrap().len(), 40);

        let listed = ListSkillsTool.execute(json!({}), &state).await.unwrap();
        assert_eq!(listed.value["count"], 1);
        assert_eq!(listed.value["skills"][0]["name"], "double");
    }

    #[tokio::test]
    async fn test_invalid_name_and_missing_skill() {
        let (_dir, state) = test_support::state();

        let output = SaveSkillTool
            .execute(json!({"name": "../evil", "code": "x = 1"}), &state)
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["kind"], "validation_error");

        let output = LoadSkillTool
            .execute(json!({"name": "missing"}), &state)
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["error"], "Skill not found: missing");
    }
}
