/// Skill persistence: named, reusable code snippets saved across sessions.
///
/// Layout:
///   {skills_dir}/{name}.py     : the code, verbatim
///   {skills_dir}/{name}.json   : metadata (name, description, created, code_hash)
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::error::SandboxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// RFC 3339 timestamp of the last save
    pub created: String,
    /// SHA-1 of the code, lowercase hex
    pub code_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Skill {
    pub name: String,
    pub code: String,
    /// Empty object when the metadata file is missing or unreadable.
    pub metadata: serde_json::Value,
}

pub struct SkillStore {
    dir: PathBuf,
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn is_valid_skill_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl SkillStore {
    pub fn open(dir: &Path) -> Result<Self, SandboxError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_name(name: &str) -> Result<(), SandboxError> {
        if is_valid_skill_name(name) {
            Ok(())
        } else {
            Err(SandboxError::Validation(
                "Invalid skill name. Use alphanumeric and underscores only.".to_string(),
            ))
        }
    }

    /// Saves (or overwrites) a skill. Returns the confirmation message.
    pub fn save(&self, name: &str, code: &str, description: &str) -> Result<String, SandboxError> {
        Self::check_name(name)?;
        let metadata = SkillMetadata {
            name: name.to_string(),
            description: description.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
            code_hash: hex::encode(Sha1::digest(code.as_bytes())),
        };
        fs::write(self.dir.join(format!("{name}.py")), code)?;
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| SandboxError::Validation(format!("Cannot encode skill metadata: {e}")))?;
        fs::write(self.dir.join(format!("{name}.json")), json)?;
        info!("Saved skill {name} ({} bytes)", code.len());
        Ok(format!("Skill '{name}' saved successfully"))
    }

    pub fn load(&self, name: &str) -> Result<Skill, SandboxError> {
        Self::check_name(name)?;
        let code_path = self.dir.join(format!("{name}.py"));
        if !code_path.is_file() {
            return Err(SandboxError::not_found(format!("Skill not found: {name}")));
        }
        let code = fs::read_to_string(&code_path)?;
        let metadata = fs::read_to_string(self.dir.join(format!("{name}.json")))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        Ok(Skill {
            name: name.to_string(),
            code,
            metadata,
        })
    }

    /// Metadata of every saved skill, sorted by name. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<SkillMetadata>, SandboxError> {
        let mut skills = Vec::new();
        for entry in fs::read_dir(&self.dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<SkillMetadata>(&text).ok())
            {
                Some(meta) => skills.push(meta),
                None => warn!("Skipping unreadable skill metadata {}", path.display()),
            }
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    pub fn count(&self) -> usize {
        self.list().map(|s| s.len()).unwrap_or(0)
    }
}
