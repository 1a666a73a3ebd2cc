mod config;
mod config_watcher;

use clap::{Parser, Subcommand};
use conductor_gateway::GatewayServer;
use conductor_orchestrator::{
    ExecutorRegistry, Orchestrator, PlanSelector, QueueExecutor, TemplateRegistry, WorkQueue,
    DEFAULT_TEMPLATE,
};
use config::ConductorConfig;
use config_watcher::ConfigWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: DAG-planned query orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not watch the config file for template changes
        #[arg(long)]
        no_reload: bool,
    },
    /// Manage templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Show which template a query would run, without submitting it
    Plan {
        query: String,
        #[arg(long, default_value = "anonymous")]
        user_id: String,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List the effective templates
    List,
}

fn build_registry(config: &ConductorConfig) -> anyhow::Result<Arc<TemplateRegistry>> {
    let registry = TemplateRegistry::new(DEFAULT_TEMPLATE, config.orchestrator.selection_policy);
    registry.sync(config.template_set())?;
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = ConductorConfig::load(&cli.config)?;
    let registry = build_registry(&config)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_reload,
        } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let store = config.open_store().await?;
            info!(backend = ?config.store.backend, path = %config.store.path.display(), "Task store opened");

            // Every stage without an in-process executor is served through the queue.
            let queue = Arc::new(WorkQueue::new());
            let mut executors = ExecutorRegistry::new();
            executors.set_fallback(Arc::new(QueueExecutor::new(queue.clone())));

            let orchestrator = Arc::new(Orchestrator::new(
                &config.orchestrator,
                registry.clone(),
                Arc::new(executors),
                store,
            )?);

            let resumed = orchestrator.recover().await?;
            if !resumed.is_empty() {
                info!(count = resumed.len(), "Resumed in-progress tasks");
            }

            let _watcher = if no_reload || !cli.config.exists() {
                None
            } else {
                match ConfigWatcher::for_registry(cli.config.clone(), 500, registry.clone()) {
                    Ok(w) => Some(w),
                    Err(e) => {
                        warn!(error = %e, "Template hot reload disabled");
                        None
                    }
                }
            };

            let app = GatewayServer::build_with_claim_wait(
                orchestrator,
                queue,
                Duration::from_secs(config.server.max_claim_wait_secs),
            );

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(templates = registry.len(), "Conductor gateway listening on {}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Templates { action } => match action {
            TemplateAction::List => {
                println!("Templates (selection policy: {:?}):", registry.policy());
                for template in registry.list() {
                    let marker = if template.name == registry.default_name() {
                        " [default]"
                    } else {
                        ""
                    };
                    println!(
                        "  {} v{}{}{}",
                        template.name,
                        template.version,
                        marker,
                        if template.active { "" } else { " (inactive)" }
                    );
                    println!("    stages: {}", template.stages.join(" -> "));
                    if !template.description.is_empty() {
                        println!("    {}", template.description);
                    }
                }
                println!("\nTotal: {} template(s)", registry.len());
            }
        },
        Commands::Plan { query, user_id } => {
            let selector = PlanSelector::new(registry)?;
            let (template, features) = selector.choose_plan(&query, &user_id)?;
            let plan = serde_json::json!({
                "template": template.name,
                "version": template.version,
                "stages": template.stages,
                "features": features,
            });
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}
