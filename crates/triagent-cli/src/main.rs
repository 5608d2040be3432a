use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use triagent_core::AgentCard;
use triagent_gateway::GatewayServer;
use triagent_orchestrator::{Orchestrator, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "triagent", about = "Triagent — Medical Multi-Agent Task Orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "triagent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and its HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the configured agent card as JSON
    Card,
}

#[derive(Deserialize)]
struct TriagentConfig {
    agent: AgentSection,
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    security: SecuritySection,
    #[serde(default)]
    dispatch: DispatchSection,
    /// Backup agent per task type, used on agent failure.
    #[serde(default)]
    backup_agents: HashMap<String, String>,
}

#[derive(Deserialize)]
struct AgentSection {
    agent_id: String,
    name: String,
    endpoint: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    medical_specialization: Option<String>,
}

#[derive(Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Default)]
struct SecuritySection {
    /// Hex-encoded token signing secret. Generated fresh when absent.
    #[serde(default)]
    token_secret: Option<String>,
    /// Hex-encoded 32-byte field encryption key. Generated fresh when
    /// absent; payloads sealed before a restart then become unreadable.
    #[serde(default)]
    cipher_key: Option<String>,
    /// Regex overriding the default sensitive-field pattern.
    #[serde(default)]
    sensitive_pattern: Option<String>,
    /// When set, audit events are also written as JSONL under this path.
    #[serde(default)]
    audit_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct DispatchSection {
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    200
}

fn build_card(agent: &AgentSection) -> AgentCard {
    let mut card = AgentCard::new(&agent.agent_id, &agent.name, &agent.endpoint)
        .with_capabilities(agent.capabilities.clone());
    card.medical_specialization = agent.medical_specialization.clone();
    card
}

fn build_orchestrator_config(config: &TriagentConfig) -> anyhow::Result<OrchestratorConfig> {
    let mut orch_config = OrchestratorConfig::new(build_card(&config.agent));

    if let Some(secret) = &config.security.token_secret {
        orch_config.token_secret = Some(hex::decode(secret)?);
    }
    if let Some(key) = &config.security.cipher_key {
        let bytes = hex::decode(key)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("cipher_key must be exactly 32 hex-encoded bytes"))?;
        orch_config.cipher_key = Some(key);
    }
    orch_config.sensitive_pattern = config.security.sensitive_pattern.clone();
    orch_config.audit_dir = config.security.audit_dir.clone();
    orch_config.backup_agents = config.backup_agents.clone();
    orch_config.dispatch.max_retries = config.dispatch.max_retries;
    orch_config.dispatch.retry_backoff = Duration::from_millis(config.dispatch.retry_backoff_ms);
    Ok(orch_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let config: TriagentConfig = toml::from_str(&config_str)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            info!("Starting Triagent gateway on {}:{}", host, port);
            if config.security.cipher_key.is_none() {
                tracing::warn!(
                    "no cipher_key configured; sealed fields will be unreadable after restart"
                );
            }

            let orch_config = build_orchestrator_config(&config)?;
            if !config.backup_agents.is_empty() {
                info!(
                    count = config.backup_agents.len(),
                    "backup agent reassignment enabled"
                );
            }
            let orch = Orchestrator::start(orch_config, None)?;
            let app = GatewayServer::build(orch);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Triagent gateway listening on {}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Card => {
            let card = build_card(&config.agent);
            println!("{}", serde_json::to_string_pretty(&card)?);
        }
    }

    Ok(())
}
