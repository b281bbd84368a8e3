use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::{LimitsOverride, ResourceLimits};

/// Environment variable naming the base directory of the agentic system.
pub const BASE_DIR_ENV: &str = "AGENTIC_SYSTEM_PATH";
const DEFAULT_BASE_DIR: &str = "/mnt/agentic-system";
/// Location of this server's data under the base directory.
const SERVER_DATA_DIR: &str = "mcp-servers/code-execution-mcp";

const MIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Ceiling for any configured or requested timeout.
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_MEMORY_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

fn default_server_name() -> String {
    "code-execution".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub default_timeout_seconds: f64,
    pub max_timeout_seconds: f64,
    pub default_memory_mb: u64,
    pub max_memory_mb: u64,
    /// Largest accepted source, in bytes
    pub max_source_bytes: usize,
    /// Largest accepted serialised bindings, in bytes
    pub max_bindings_bytes: usize,
    /// Captured `print` output beyond this is cut
    pub max_output_bytes: usize,
    pub max_concurrent_executions: usize,
    /// Worker executable. Defaults to the running binary.
    pub worker_program: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30.0,
            max_timeout_seconds: 300.0,
            default_memory_mb: 500,
            max_memory_mb: 2048,
            max_source_bytes: 100 * 1024,
            max_bindings_bytes: 10 * 1024 * 1024,
            max_output_bytes: 64 * 1024,
            max_concurrent_executions: 4,
            worker_program: None,
        }
    }
}

impl SandboxConfig {
    pub fn default_limits(&self) -> ResourceLimits {
        self.resolve_limits(None)
    }

    /// Applies a per-call override, clamped into the configured range.
    /// A request can lower a limit or raise it up to the maximum, never beyond.
    pub fn resolve_limits(&self, limits: Option<&LimitsOverride>) -> ResourceLimits {
        let min_secs = MIN_TIMEOUT.as_secs_f64();
        let max_timeout_secs = if self.max_timeout_seconds.is_nan() {
            min_secs
        } else {
            self.max_timeout_seconds.clamp(min_secs, MAX_TIMEOUT.as_secs_f64())
        };
        let max_memory = self
            .max_memory_mb
            .saturating_mul(1024 * 1024)
            .max(MIN_MEMORY_BYTES);

        let timeout_secs = limits
            .and_then(|l| l.timeout_seconds)
            .filter(|t| t.is_finite())
            .unwrap_or(self.default_timeout_seconds);
        // Clamp in f64 first: huge values do not fit a Duration.
        let timeout_secs = if timeout_secs.is_nan() {
            max_timeout_secs
        } else {
            timeout_secs.clamp(min_secs, max_timeout_secs)
        };
        let timeout = Duration::from_secs_f64(timeout_secs);

        let memory_mb = limits
            .and_then(|l| l.memory_mb)
            .unwrap_or(self.default_memory_mb);
        let memory_bytes = memory_mb
            .saturating_mul(1024 * 1024)
            .clamp(MIN_MEMORY_BYTES, max_memory);

        ResourceLimits {
            timeout,
            memory_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Supports ${ENV_VAR} substitution
    pub base_dir: PathBuf,
    pub workspace_dir: Option<PathBuf>,
    pub skills_dir: Option<PathBuf>,
    pub tools_registry_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = std::env::var(BASE_DIR_ENV).unwrap_or_else(|_| DEFAULT_BASE_DIR.to_string());
        Self {
            base_dir: PathBuf::from(base),
            workspace_dir: None,
            skills_dir: None,
            tools_registry_dir: None,
        }
    }
}

impl PathsConfig {
    /// All directories under one root, as used by tests and local runs.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            base_dir: base.to_path_buf(),
            workspace_dir: None,
            skills_dir: None,
            tools_registry_dir: None,
        }
    }

    fn data_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(SERVER_DATA_DIR).join(name)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| self.data_dir("workspace"))
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.skills_dir.clone().unwrap_or_else(|| self.data_dir("skills"))
    }

    pub fn tools_registry_dir(&self) -> PathBuf {
        self.tools_registry_dir
            .clone()
            .unwrap_or_else(|| self.data_dir("tools_registry"))
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${AGENTIC_SYSTEM_PATH}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.name, "code-execution");
        assert_eq!(config.sandbox.max_concurrent_executions, 4);
        let limits = config.sandbox.default_limits();
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert_eq!(limits.memory_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn test_partial_sandbox_section() {
        let config = Config::parse(
            r#"
            [sandbox]
            default_timeout_seconds = 5.0
            max_output_bytes = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.sandbox.default_limits().timeout, Duration::from_secs(5));
        assert_eq!(config.sandbox.max_output_bytes, 1024);
        assert_eq!(config.sandbox.default_memory_mb, 500);
    }

    #[test]
    fn test_paths_layout() {
        let paths = PathsConfig::rooted_at(Path::new("/srv/agentic"));
        assert_eq!(
            paths.workspace_dir(),
            PathBuf::from("/srv/agentic/mcp-servers/code-execution-mcp/workspace")
        );
        assert_eq!(
            paths.skills_dir(),
            PathBuf::from("/srv/agentic/mcp-servers/code-execution-mcp/skills")
        );
        assert_eq!(
            paths.tools_registry_dir(),
            PathBuf::from("/srv/agentic/mcp-servers/code-execution-mcp/tools_registry")
        );
    }

    #[test]
    fn test_explicit_dir_overrides_layout() {
        let config = Config::parse(
            r#"
            [paths]
            base_dir = "/srv/agentic"
            workspace_dir = "/tmp/ws"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.workspace_dir(), PathBuf::from("/tmp/ws"));
        assert!(config.paths.skills_dir().starts_with("/srv/agentic"));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("CODE_SANDBOX_TEST_BASE", "/opt/from-env");
        let config = Config::parse(
            r#"
            [paths]
            base_dir = "${CODE_SANDBOX_TEST_BASE}"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.base_dir, PathBuf::from("/opt/from-env"));
    }

    #[test]
    fn test_overrides_are_clamped() {
        let sandbox = SandboxConfig::default();

        let low = LimitsOverride {
            timeout_seconds: Some(0.01),
            memory_mb: Some(1),
        };
        let limits = sandbox.resolve_limits(Some(&low));
        assert_eq!(limits.timeout, Duration::from_secs(1));
        assert_eq!(limits.memory_bytes, 16 * 1024 * 1024);

        let high = LimitsOverride {
            timeout_seconds: Some(1e9),
            memory_mb: Some(1 << 40),
        };
        let limits = sandbox.resolve_limits(Some(&high));
        assert_eq!(limits.timeout, Duration::from_secs(300));
        assert_eq!(limits.memory_bytes, 2048 * 1024 * 1024);
    }

    #[test]
    fn test_override_within_range_is_kept() {
        let sandbox = SandboxConfig::default();
        let limits = sandbox.resolve_limits(Some(&LimitsOverride {
            timeout_seconds: Some(2.5),
            memory_mb: None,
        }));
        assert_eq!(limits.timeout, Duration::from_millis(2500));
        assert_eq!(limits.memory_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_or_default("/nonexistent/sandbox.toml").unwrap();
        assert_eq!(config.sandbox.max_source_bytes, 100 * 1024);
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::parse(include_str!("../config/sandbox.toml")).unwrap();
        assert_eq!(config.sandbox.max_output_bytes, 64 * 1024);
        assert_eq!(config.sandbox.max_bindings_bytes, 10 * 1024 * 1024);
        assert!(config.sandbox.worker_program.is_none());
    }

    #[test]
    fn test_extreme_overrides_do_not_panic() {
        let sandbox = SandboxConfig::default();

        let huge = LimitsOverride {
            timeout_seconds: Some(1e300),
            memory_mb: Some(u64::MAX),
        };
        let limits = sandbox.resolve_limits(Some(&huge));
        assert_eq!(limits.timeout, Duration::from_secs(300));
        assert_eq!(limits.memory_bytes, 2048 * 1024 * 1024);

        let negative = LimitsOverride {
            timeout_seconds: Some(-5.0),
            memory_mb: Some(0),
        };
        let limits = sandbox.resolve_limits(Some(&negative));
        assert_eq!(limits.timeout, Duration::from_secs(1));
        assert_eq!(limits.memory_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_extreme_configured_maximums_do_not_panic() {
        let sandbox = SandboxConfig {
            max_timeout_seconds: 1e300,
            max_memory_mb: u64::MAX,
            ..SandboxConfig::default()
        };
        let limits = sandbox.resolve_limits(Some(&LimitsOverride {
            timeout_seconds: Some(1e200),
            memory_mb: Some(u64::MAX),
        }));
        assert_eq!(limits.timeout, MAX_TIMEOUT);
        assert_eq!(limits.memory_bytes, u64::MAX);
    }
}
