use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_sandbox::config::Config;
use code_sandbox::sandbox::worker::{self, WORKER_FLAG};
use code_sandbox::server::McpServer;
use code_sandbox::state::AppState;
use code_sandbox::tools::ToolRegistry;

fn print_help() {
    println!(
        "\
code-sandbox v{}

Sandboxed code execution and PII tokenization, served as MCP tools over stdio.

USAGE:
    code-sandbox [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/sandbox.toml]
                   A missing file means built-in defaults.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG               Log level filter for tracing
                           (e.g. debug, code_sandbox=debug,warn)
    AGENTIC_SYSTEM_PATH    Base directory for the workspace, skills and tool
                           catalog [default: /mnt/agentic-system]

EXAMPLES:
    code-sandbox                              # uses config/sandbox.toml
    code-sandbox /etc/code-sandbox.toml       # custom config path
    RUST_LOG=debug code-sandbox               # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

fn main() -> Result<()> {
    // Worker mode runs before any runtime threads exist: their stacks
    // count against the worker's address-space limit.
    if std::env::args().nth(1).as_deref() == Some(WORKER_FLAG) {
        return worker::run_worker();
    }

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("code-sandbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("code_sandbox=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/sandbox.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load_or_default(&config_path)?;

    info!("Server: {} v{}", config.server.name, env!("CARGO_PKG_VERSION"));
    info!(
        "Limits: {}s / {} MB by default, at most {} concurrent executions",
        config.sandbox.default_timeout_seconds,
        config.sandbox.default_memory_mb,
        config.sandbox.max_concurrent_executions
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start the async runtime")?;

    runtime.block_on(async move {
        let state = AppState::new(config)?;
        let tools = ToolRegistry::with_builtin_tools();
        info!("Tools: {} registered", tools.len());

        let server = McpServer::new(state, tools);
        tokio::select! {
            result = server.run_stdio() => {
                info!("Input closed, exiting");
                result
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                Ok(())
            }
        }
    })
}
