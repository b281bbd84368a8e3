use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolError, ToolOutput};
use crate::state::AppState;

/// Replaces personal data in a text with reversible tokens.
///
/// The originals stay in the server's vault; only tokens such as
/// `[EMAIL_1a2b3c4d]` leave the process.
pub struct SanitizePiiTool;

#[async_trait]
impl Tool for SanitizePiiTool {
    fn name(&self) -> &str {
        "sanitize_pii"
    }

    fn description(&self) -> &str {
        "Replace personal data (emails, phone numbers, SSNs, credit cards, IP addresses, \
         API keys) with tokens before the text is processed further. The same value always \
         gets the same token. Use restore_pii to put the originals back."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text that may contain personal data"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let text = required_str(&params, "text")?;
        let sanitized = state.tokenizer.sanitize(text);
        let distinct: HashSet<&str> = sanitized.tokens.iter().map(|t| t.token.as_str()).collect();

        Ok(ToolOutput::ok(json!({
            "sanitized_text": sanitized.text,
            "pii_found": distinct.len(),
            "pii_types": sanitized.categories,
            "tokens": sanitized.tokens,
        })))
    }
}

/// Puts original values back in place of tokens produced by [`SanitizePiiTool`].
pub struct RestorePiiTool;

#[async_trait]
impl Tool for RestorePiiTool {
    fn name(&self) -> &str {
        "restore_pii"
    }

    fn description(&self) -> &str {
        "Replace PII tokens in a text with the original values. Tokens this server did not \
         issue are left as they are and reported in `unresolved`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text containing tokens such as [EMAIL_1a2b3c4d]"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value, state: &AppState) -> Result<ToolOutput, ToolError> {
        let text = required_str(&params, "text")?;
        let restored = state.tokenizer.restore(text);

        Ok(ToolOutput::ok(json!({
            "restored_text": restored.text,
            "unresolved": restored.unresolved,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;

    #[test]
    fn test_schemas_require_text() {
        for tool in [&SanitizePiiTool as &dyn Tool, &RestorePiiTool] {
            let schema = tool.parameters_schema();
            assert_eq!(schema["properties"]["text"]["type"], "string");
            assert_eq!(schema["required"], json!(["text"]));
        }
    }

    #[tokio::test]
    async fn test_sanitize_then_restore() {
        let (_dir, state) = test_support::state();
        let text = "Contact john@example.com at 555-123-4567";

        let sanitized = SanitizePiiTool
            .execute(json!({"text": text}), &state)
            .await
            .unwrap()
            .value;
        let masked = sanitized["sanitized_text"].as_str().unwrap();
        assert!(!masked.contains("john@example.com"));
        assert!(!masked.contains("555-123-4567"));
        assert_eq!(sanitized["pii_found"], 2);
        assert_eq!(sanitized["pii_types"], json!(["EMAIL", "PHONE"]));
        assert_eq!(sanitized["tokens"].as_array().unwrap().len(), 2);
        assert_eq!(sanitized["tokens"][0]["category"], "EMAIL");

        let restored = RestorePiiTool
            .execute(json!({"text": masked}), &state)
            .await
            .unwrap()
            .value;
        assert_eq!(restored["restored_text"], text);
        assert_eq!(restored["unresolved"], json!([]));
    }

    #[tokio::test]
    async fn test_sanitize_clean_text() {
        let (_dir, state) = test_support::state();
        let output = SanitizePiiTool
            .execute(json!({"text": "nothing to see here"}), &state)
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.value["sanitized_text"], "nothing to see here");
        assert_eq!(output.value["pii_found"], 0);
        assert_eq!(output.value["pii_types"], json!([]));
    }

    #[tokio::test]
    async fn test_pii_found_counts_distinct_values() {
        let (_dir, state) = test_support::state();
        let output = SanitizePiiTool
            .execute(
                json!({"text": "a@example.com, b@example.com, a@example.com"}),
                &state,
            )
            .await
            .unwrap();
        assert_eq!(output.value["tokens"].as_array().unwrap().len(), 3);
        assert_eq!(output.value["pii_found"], 2);
    }

    #[tokio::test]
    async fn test_restore_reports_unknown_tokens() {
        let (_dir, state) = test_support::state();
        let output = RestorePiiTool
            .execute(json!({"text": "hi [EMAIL_deadbeef]"}), &state)
            .await
            .unwrap();
        assert_eq!(output.value["restored_text"], "hi [EMAIL_deadbeef]");
        assert_eq!(output.value["unresolved"], json!(["[EMAIL_deadbeef]"]));
    }

    #[tokio::test]
    async fn test_missing_text_param() {
        let (_dir, state) = test_support::state();
        let result = SanitizePiiTool.execute(json!({}), &state).await;
        assert!(matches!(result, Err(ToolError::InvalidParams(m)) if m.contains("text")));
    }
}
