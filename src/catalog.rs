/// Tool catalog for progressive discovery: search summaries first, load a
/// full definition only when it is needed.
///
/// Source file: {tools_registry_dir}/full_catalog.json
///
/// {"categories": {cat: {"description": .., "tools": {name: {"description": ..,
///   "mcp_server": .., "functions": [..], "use_cases": [..]}}}},
///  "total_tools": N, "core_mcps": [..]}
///
/// The file is read once, on first use. A missing file is an empty catalog.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::SandboxError;

pub const CATALOG_FILE: &str = "full_catalog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Summary,
    Full,
}

impl DetailLevel {
    /// Anything other than "full" is a summary.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("full") {
            DetailLevel::Full
        } else {
            DetailLevel::Summary
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Summary => "summary",
            DetailLevel::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEntry {
    pub name: String,
    pub category: String,
    pub mcp_server: Value,
    pub description: Value,
    pub functions: Vec<String>,
    pub use_cases: Vec<String>,
}

impl ToolEntry {
    pub fn to_json(&self, detail: DetailLevel) -> Value {
        match detail {
            DetailLevel::Summary => json!({
                "name": self.name,
                "category": self.category,
                "description": self.description,
                "mcp_server": self.mcp_server,
            }),
            DetailLevel::Full => json!(self),
        }
    }
}

pub struct ToolCatalog {
    path: PathBuf,
    data: OnceLock<Value>,
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

impl ToolCatalog {
    pub fn new(registry_dir: &Path) -> Self {
        Self {
            path: registry_dir.join(CATALOG_FILE),
            data: OnceLock::new(),
        }
    }

    fn data(&self) -> &Value {
        self.data.get_or_init(|| match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) if value.is_object() => {
                    info!("Loaded tool catalog from {}", self.path.display());
                    value
                }
                Ok(_) | Err(_) => {
                    warn!("Ignoring malformed tool catalog {}", self.path.display());
                    json!({"categories": {}})
                }
            },
            Err(_) => json!({"categories": {}}),
        })
    }

    fn category_map(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data()
            .get("categories")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|m| m.iter())
    }

    fn tools_of(category: &Value) -> impl Iterator<Item = (&String, &Value)> {
        category
            .get("tools")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|m| m.iter())
    }

    /// Case-insensitive substring search over name, description, functions
    /// and use cases, optionally restricted to one category.
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<ToolEntry> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for (cat_name, cat) in self.category_map() {
            if category.is_some_and(|c| c != cat_name.as_str()) {
                continue;
            }
            for (name, tool) in Self::tools_of(cat) {
                let entry = ToolEntry {
                    name: name.clone(),
                    category: cat_name.clone(),
                    mcp_server: tool.get("mcp_server").cloned().unwrap_or(Value::Null),
                    description: tool.get("description").cloned().unwrap_or(Value::Null),
                    functions: strings(tool.get("functions")),
                    use_cases: strings(tool.get("use_cases")),
                };
                let searchable = format!(
                    "{} {} {} {}",
                    entry.name,
                    entry.description.as_str().unwrap_or(""),
                    entry.functions.join(" "),
                    entry.use_cases.join(" ")
                )
                .to_lowercase();
                if searchable.contains(&needle) {
                    results.push(entry);
                }
            }
        }
        results
    }

    /// Full definition of `name` with its category added.
    pub fn get(&self, name: &str, category: Option<&str>) -> Result<Value, SandboxError> {
        for (cat_name, cat) in self.category_map() {
            if category.is_some_and(|c| c != cat_name.as_str()) {
                continue;
            }
            if let Some(tool) = cat.get("tools").and_then(|t| t.get(name)) {
                let mut tool = tool.as_object().cloned().unwrap_or_default();
                tool.insert("category".to_string(), Value::String(cat_name.clone()));
                return Ok(Value::Object(tool));
            }
        }
        Err(SandboxError::not_found(format!("Tool not found: {name}")))
    }

    /// `{category: {description, tool_count}}`
    pub fn categories(&self) -> Map<String, Value> {
        self.category_map()
            .map(|(name, cat)| {
                let description = cat.get("description").cloned().unwrap_or_else(|| json!(""));
                let tool_count = Self::tools_of(cat).count();
                (
                    name.clone(),
                    json!({"description": description, "tool_count": tool_count}),
                )
            })
            .collect()
    }

    /// The declared `total_tools`, or the counted tools when absent.
    pub fn total_tools(&self) -> u64 {
        self.data()
            .get("total_tools")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                self.category_map()
                    .map(|(_, cat)| Self::tools_of(cat).count() as u64)
                    .sum()
            })
    }

    pub fn core_mcps(&self) -> Value {
        self.data().get("core_mcps").cloned().unwrap_or_else(|| json!([]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog() -> (TempDir, ToolCatalog) {
        let dir = TempDir::new().unwrap();
        let data = json!({
            "categories": {
                "security": {
                    "description": "Security tooling",
                    "tools": {
                        "vuln_scanner": {
                            "description": "Scan hosts for known vulnerabilities",
                            "mcp_server": "security-mcp",
                            "functions": ["scan_host", "scan_range"],
                            "use_cases": ["audit a subnet"]
                        }
                    }
                },
                "memory": {
                    "description": "Persistent memory",
                    "tools": {
                        "knowledge_graph": {
                            "description": "Store entities and relations",
                            "mcp_server": "memory-mcp",
                            "functions": ["add_entity"],
                            "use_cases": ["remember facts"]
                        },
                        "vector_store": {
                            "description": "Semantic search over documents",
                            "mcp_server": "memory-mcp",
                            "functions": ["query"],
                            "use_cases": ["scan notes for context"]
                        }
                    }
                }
            },
            "total_tools": 3,
            "core_mcps": ["memory-mcp"]
        });
        std::fs::write(dir.path().join(CATALOG_FILE), data.to_string()).unwrap();
        let catalog = ToolCatalog::new(dir.path());
        (dir, catalog)
    }

    #[test]
    fn test_search_matches_all_fields_case_insensitively() {
        let (_dir, catalog) = catalog();
        let names: Vec<_> = catalog.search("SCAN", None).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["vuln_scanner", "vector_store"]);

        let by_function = catalog.search("add_entity", None);
        assert_eq!(by_function.len(), 1);
        assert_eq!(by_function[0].category, "memory");
    }

    #[test]
    fn test_search_category_filter() {
        let (_dir, catalog) = catalog();
        let found = catalog.search("scan", Some("memory"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "vector_store");
    }

    #[test]
    fn test_summary_and_full_detail() {
        let (_dir, catalog) = catalog();
        let entry = &catalog.search("vuln", None)[0];
        let summary = entry.to_json(DetailLevel::Summary);
        assert_eq!(summary.as_object().unwrap().len(), 4);
        assert!(summary.get("functions").is_none());
        let full = entry.to_json(DetailLevel::Full);
        assert_eq!(full["functions"], json!(["scan_host", "scan_range"]));
    }

    #[test]
    fn test_get_adds_category() {
        let (_dir, catalog) = catalog();
        let tool = catalog.get("knowledge_graph", None).unwrap();
        assert_eq!(tool["category"], "memory");
        assert_eq!(tool["mcp_server"], "memory-mcp");
        assert_eq!(catalog.get("knowledge_graph", Some("security")).unwrap_err().kind(), "not_found");
        assert_eq!(catalog.get("missing", None).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_categories_and_totals() {
        let (_dir, catalog) = catalog();
        let categories = catalog.categories();
        assert_eq!(categories["memory"]["tool_count"], 2);
        assert_eq!(categories["security"]["description"], "Security tooling");
        assert_eq!(catalog.total_tools(), 3);
        assert_eq!(catalog.core_mcps(), json!(["memory-mcp"]));
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let dir = TempDir::new().unwrap();
        let catalog = ToolCatalog::new(dir.path());
        assert!(catalog.search("anything", None).is_empty());
        assert!(catalog.categories().is_empty());
        assert_eq!(catalog.total_tools(), 0);
    }

    #[test]
    fn test_detail_level_parse() {
        assert_eq!(DetailLevel::parse("FULL"), DetailLevel::Full);
        assert_eq!(DetailLevel::parse("summary"), DetailLevel::Summary);
        assert_eq!(DetailLevel::parse("whatever"), DetailLevel::Summary);
    }
}
