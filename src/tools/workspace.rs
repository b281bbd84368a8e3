use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, Tool, ToolError, ToolOutput};
use crate::state::AppState;

/// `filename`, or its alias `path`.
fn filename(params: &Value) -> Result<&str, ToolError> {
    match optional_str(params, "filename")? {
        Some(name) => Ok(name),
        None => optional_str(params, "path")?.ok_or_else(|| {
            ToolError::InvalidParams("Missing required parameter: filename".to_string())
        }),
    }
}

fn filename_schema(extra: Value) -> Value {
    let mut properties = json!({
        "filename": {
            "type": "string",
            "description": "Path relative to the workspace root"
        }
    });
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    let mut required = vec!["filename"];
    if properties.get("content").is_some() {
        required.push("content");
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub struct ReadWorkspaceFileTool;

#[async_trait]
impl Tool for ReadWorkspaceFileTool {
    fn name(&self) -> &str {
        "read_workspace_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandbox workspace, e.g. a result written by execute_code."
    }

    fn parameters_schema(&self) -> Value {
        filename_schema(json!({}))
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = filename(&params)?;
        Ok(match state.workspace().read(name) {
            Ok(content) => ToolOutput::ok(json!({
                "success": true,
                "filename": name,
                "size": content.len(),
                "content": content,
            })),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct WriteWorkspaceFileTool;

#[async_trait]
impl Tool for WriteWorkspaceFileTool {
    fn name(&self) -> &str {
        "write_workspace_file"
    }

    fn description(&self) -> &str {
        "Write a text file to the sandbox workspace so sandboxed code can read it. \
         Parent directories are created; an existing file is replaced."
    }

    fn parameters_schema(&self) -> Value {
        filename_schema(json!({
            "content": {
                "type": "string",
                "description": "File content"
            }
        }))
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = filename(&params)?;
        let content = super::required_str(&params, "content")?;
        Ok(match state.workspace().write(name, content) {
            Ok(written) => ToolOutput::ok(json!({
                "success": true,
                "message": format!("Written {written} bytes to {name}"),
            })),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct ListWorkspaceFilesTool;

#[async_trait]
impl Tool for ListWorkspaceFilesTool {
    fn name(&self) -> &str {
        "list_workspace_files"
    }

    fn description(&self) -> &str {
        "List the files under a workspace directory, recursively."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subpath": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default: the root)"
                }
            }
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let dir = match optional_str(&params, "subpath")? {
            Some(dir) => dir,
            None => optional_str(&params, "dir")?.unwrap_or("."),
        };
        Ok(match state.workspace().list(dir) {
            Ok(files) => ToolOutput::ok(json!({
                "success": true,
                "path": dir,
                "count": files.len(),
                "files": files,
            })),
            Err(e) => ToolOutput::from_error(&e),
        })
    }
}

pub struct DeleteWorkspaceFileTool;

#[async_trait]
impl Tool for DeleteWorkspaceFileTool {
    fn name(&self) -> &str {
        "delete_workspace_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the sandbox workspace."
    }

    fn parameters_schema(&self) -> Value {
        filename_schema(json!({}))
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let name = filename(&params)?;
        Ok(match state.workspace().delete(name) {
            Ok(()) => ToolOutput::ok(json!({
                "success": true,
                "message": format!("Deleted {name}"),
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
    fn test_write_schema_requires_content() {
        let schema = WriteWorkspaceFileTool.parameters_schema();
        assert_eq!(schema["required"], json!(["filename", "content"]));
        assert_eq!(schema["properties"]["content"]["type"], "string");

        let schema = ReadWorkspaceFileTool.parameters_schema();
        assert_eq!(schema["required"], json!(["filename"]));
    }

    #[test]
    fn test_filename_alias() {
        assert_eq!(filename(&json!({"filename": "a"})).unwrap(), "a");
        assert_eq!(filename(&json!({"path": "b"})).unwrap(), "b");
        assert!(filename(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let (_dir, state) = test_support::state();

        let written = WriteWorkspaceFileTool
            .execute(json!({"filename": "out/report.txt", "content": "hello"}), &state)
            .await
            .unwrap();
        assert_eq!(written.value["message"], "Written 5 bytes to out/report.txt");

        let read = ReadWorkspaceFileTool
            .execute(json!({"path": "out/report.txt"}), &state)
            .await
            .unwrap();
        assert_eq!(read.value["content"], "hello");
        assert_eq!(read.value["size"], 5);

        let listed = ListWorkspaceFilesTool.execute(json!({}), &state).await.unwrap();
        assert_eq!(listed.value["files"], json!(["out/report.txt"]));
        assert_eq!(listed.value["count"], 1);

        let deleted = DeleteWorkspaceFileTool
            .execute(json!({"filename": "out/report.txt"}), &state)
            .await
            .unwrap();
        assert_eq!(deleted.value["message"], "Deleted out/report.txt");
        assert_eq!(state.workspace().file_count(), 0);
    }

    #[tokio::test]
    async fn test_traversal_is_capability_violation() {
        let (_dir, state) = test_support::state();
        let output = ReadWorkspaceFileTool
            .execute(json!({"filename": "../../etc/passwd"}), &state)
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["kind"], "capability_violation");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_dir, state) = test_support::state();
        let output = DeleteWorkspaceFileTool
            .execute(json!({"filename": "missing.txt"}), &state)
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.value["kind"], "not_found");

        let output = ListWorkspaceFilesTool
            .execute(json!({"subpath": "nope"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["kind"], "not_found");
    }
}
