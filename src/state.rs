//! Everything a request handler can reach, built once at startup and shared
//! by `Arc`. There is no global state.
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::ToolCatalog;
use crate::config::Config;
use crate::pii::{TokenVault, Tokenizer};
use crate::sandbox::SandboxController;
use crate::skill_store::SkillStore;
use crate::workspace::Workspace;

pub struct AppState {
    pub config: Config,
    pub controller: SandboxController,
    pub tokenizer: Tokenizer,
    pub skills: SkillStore,
    pub catalog: ToolCatalog,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let workspace_dir = config.paths.workspace_dir();
        let workspace = Workspace::open(&workspace_dir)
            .with_context(|| format!("Cannot open workspace {}", workspace_dir.display()))?;
        let skills_dir = config.paths.skills_dir();
        let skills = SkillStore::open(&skills_dir)
            .with_context(|| format!("Cannot open skills directory {}", skills_dir.display()))?;
        let catalog = ToolCatalog::new(&config.paths.tools_registry_dir());
        let controller = SandboxController::new(config.sandbox.clone(), workspace)?;
        let tokenizer = Tokenizer::new(Arc::new(TokenVault::new()));

        info!("Workspace: {}", controller.workspace().root().display());
        info!("Skills: {}", skills.dir().display());

        Ok(Self {
            config,
            controller,
            tokenizer,
            skills,
            catalog,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        self.controller.workspace()
    }
}
