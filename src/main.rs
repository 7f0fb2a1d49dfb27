use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use genroll::cloud::{Cloud, CloudInventory, HttpProbe, InMemoryCloud};
use genroll::decision::{Arbiter, DecisionRequest, Verdict};
use genroll::lifecycle::status_label;
use genroll::storage::{InMemoryTracker, PostgresTracker, ResourceTracker};
use genroll::{Config, DeployContext, DeployError, Deployment, Generation, Node, ResourceType, Result};

#[derive(Parser)]
#[command(name = "genroll")]
#[command(about = "Generation-based zero-downtime rotation of cloud node fleets", long_about = None)]
#[command(version)]
struct Cli {
    /// Deployment configuration (.toml, .yaml or .yml)
    #[arg(long, global = true, default_value = "genroll.toml")]
    config: PathBuf,

    /// Target environment; required when more than one is configured
    #[arg(long, global = true)]
    environment: Option<String>,

    /// Offline state: tracked node records and the provider inventory
    #[arg(long, global = true, default_value = "genroll-state.json")]
    state: PathBuf,

    /// Fail instead of prompting when an operator decision is needed
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked nodes and their status
    View {
        #[arg(long, value_enum)]
        generation: Option<GenerationArg>,
    },
    /// Reconcile records with the provider
    Verify,
    /// Bring the active generation back to full operation
    Repair {
        /// Make nodes operational even if they fail their health checks
        #[arg(long)]
        force: bool,
    },
    /// Promote the pending generation to active
    Increment,
    /// Take a pending or old generation out of service
    Terminate {
        #[arg(long, value_enum)]
        generation: GenerationArg,
        /// Leave the resources running
        #[arg(long)]
        soft: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Manually fix which resource fills a role
    Override {
        #[arg(long, value_enum)]
        generation: GenerationArg,
        #[arg(long = "type", value_enum)]
        resource_type: TypeArg,
        #[arg(long)]
        name: String,
        #[arg(long, conflicts_with = "retire", required_unless_present = "retire")]
        resource_id: Option<String>,
        #[arg(long)]
        retire: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GenerationArg {
    Active,
    Pending,
    Old,
}

impl From<GenerationArg> for Generation {
    fn from(arg: GenerationArg) -> Self {
        match arg {
            GenerationArg::Active => Generation::Active,
            GenerationArg::Pending => Generation::Pending,
            GenerationArg::Old => Generation::Old,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Compute,
    Database,
}

impl From<TypeArg> for ResourceType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Compute => ResourceType::Compute,
            TypeArg::Database => ResourceType::Database,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    cloud: CloudInventory,
}

impl StateFile {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Renders decision requests on the terminal and reads the answer.
struct TerminalArbiter;

impl Arbiter for TerminalArbiter {
    fn decide(&self, request: &DecisionRequest) -> Verdict {
        let options = request.options();
        loop {
            eprint!("\n{} ", request.prompt());
            let _ = std::io::stderr().flush();

            let mut input = String::new();
            match std::io::stdin().read_line(&mut input) {
                Ok(0) | Err(_) => return Verdict::Fail,
                Ok(_) => {}
            }
            let answer = input.trim();
            if let Some(verdict) = options
                .iter()
                .find(|v| v.key().eq_ignore_ascii_case(answer))
            {
                return *verdict;
            }
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_file(&cli.config)?;
    let (name, spec) = config.select_deployment(cli.environment.as_deref())?;
    let credentials = spec.credentials()?;

    let state = StateFile::load(&cli.state)?;
    check_inventory(config.database_url.as_deref(), &state.cloud, &cli.state)?;

    let interactive = !(cli.non_interactive || config.non_interactive);
    let mut context =
        DeployContext::new(name, credentials).with_timings(config.timings.clone());
    if interactive {
        context = context.interactive(Arc::new(TerminalArbiter));
    }

    let cloud = Arc::new(InMemoryCloud::for_account(state.cloud, &context.credentials)?);

    let mut offline: Option<Arc<InMemoryTracker>> = None;
    let tracker: Arc<dyn ResourceTracker> = match &config.database_url {
        Some(url) => {
            let postgres = PostgresTracker::new(url).await?;
            postgres.run_migrations().await?;
            Arc::new(postgres)
        }
        None => {
            let memory = Arc::new(InMemoryTracker::from_nodes(state.nodes));
            offline = Some(memory.clone());
            memory
        }
    };

    let probe = Arc::new(HttpProbe::new()?);
    let deployment = Deployment::new(
        context,
        spec.clone(),
        tracker,
        Cloud::uniform(cloud.clone()),
        probe,
    );

    let outcome = execute(&deployment, cli.command, interactive).await;

    let saved = StateFile {
        nodes: offline.map(|m| m.all()).unwrap_or_default(),
        cloud: cloud.inventory(),
    };
    settle(outcome, saved.persist(&cli.state), &cli.state)
}

/// Every command starts by reconciling tracked records against the provider.
/// Records in a shared database must not be reconciled against an empty
/// inventory, which would retire all of them.
fn check_inventory(
    database_url: Option<&str>,
    inventory: &CloudInventory,
    state: &Path,
) -> Result<()> {
    if database_url.is_some() && inventory.instances.is_empty() {
        return Err(DeployError::Config(format!(
            "database_url is set but {} holds no provider inventory",
            state.display()
        )));
    }
    Ok(())
}

/// The command's own error wins over a failure to save state.
fn settle(outcome: Result<()>, persisted: Result<()>, state: &Path) -> Result<()> {
    match (outcome, persisted) {
        (outcome, Ok(())) => outcome,
        (Ok(()), Err(e)) => Err(e),
        (Err(e), Err(persist_err)) => {
            log::error!("Could not save state to {}: {}", state.display(), persist_err);
            Err(e)
        }
    }
}

async fn execute(
    deployment: &Deployment<dyn ResourceTracker>,
    command: Commands,
    interactive: bool,
) -> Result<()> {
    match command {
        Commands::View { generation } => view(deployment, generation.map(Generation::from)).await,
        Commands::Verify => {
            let reconciled = deployment.verify_deployment_state(true).await?;
            for node in &reconciled {
                println!("reconciled {}", node);
            }
            println!("{} record(s) reconciled", reconciled.len());
            Ok(())
        }
        Commands::Repair { force } => {
            deployment.verify_deployment_state(true).await?;
            let repaired = deployment.repair_active_generation(force, true).await?;
            for node in &repaired {
                println!("operational {}", node);
            }
            Ok(())
        }
        Commands::Increment => {
            deployment.verify_deployment_state(true).await?;
            let promoted = deployment.increment_generation().await?;
            for node in &promoted {
                println!("active {}", node);
            }
            Ok(())
        }
        Commands::Terminate {
            generation,
            soft,
            yes,
        } => {
            let target = Generation::from(generation);
            deployment.verify_deployment_state(true).await?;
            if !yes {
                if !interactive {
                    return Err(DeployError::InvalidOptions(
                        "non-interactive terminate requires --yes".to_string(),
                    ));
                }
                let prompt = format!(
                    "{} terminate every running {} node of {}?",
                    if soft { "SOFT" } else { "HARD" },
                    target,
                    deployment.name()
                );
                if !confirm(&prompt)? {
                    return Err(DeployError::OperatorAborted(prompt));
                }
            }
            let affected = deployment.terminate_generation(target, !soft).await?;
            for node in &affected {
                println!("terminated {}", node);
            }
            Ok(())
        }
        Commands::Override {
            generation,
            resource_type,
            name,
            resource_id,
            retire,
        } => {
            let target = Generation::from(generation);
            let resource_type = ResourceType::from(resource_type);
            deployment.verify_deployment_state(true).await?;
            if deployment.spec().config_for(resource_type, &name).is_none() {
                return Err(DeployError::InvalidOptions(format!(
                    "no {} role named '{}' is configured",
                    resource_type, name
                )));
            }

            if retire {
                let existing = match target {
                    Generation::Active => deployment.get_active_node(resource_type, &name).await?,
                    Generation::Pending => deployment.get_pending_node(resource_type, &name).await?,
                    Generation::Old => None,
                };
                return match existing {
                    Some(node) => {
                        let retired = deployment.nodes().retire(&node).await?;
                        println!("retired {}", retired);
                        Ok(())
                    }
                    None => Err(DeployError::Precondition(format!(
                        "no {} node for {}:{}",
                        target, resource_type, name
                    ))),
                };
            }

            let resource_id = resource_id.ok_or_else(|| {
                DeployError::InvalidOptions("--resource-id or --retire is required".to_string())
            })?;
            let node = deployment
                .override_node(resource_type, &name, &resource_id, target)
                .await?;
            println!("altered {}", node);
            Ok(())
        }
    }
}

async fn view(
    deployment: &Deployment<dyn ResourceTracker>,
    generation: Option<Generation>,
) -> Result<()> {
    deployment.verify_deployment_state(true).await?;

    let active = deployment.active_generation_id().await?;
    let pending = deployment.pending_generation_id().await?;
    println!(
        "{}: active generation {}, pending generation {}",
        deployment.name(),
        active.map_or_else(|| "none".to_string(), |id| id.to_string()),
        pending
    );

    let sections = match generation {
        Some(target) => vec![target],
        None => vec![Generation::Active, Generation::Pending, Generation::Old],
    };
    for section in sections {
        let nodes = match section {
            Generation::Active => deployment.get_all_active_nodes(None).await?,
            Generation::Pending => deployment.get_all_pending_nodes(None).await?,
            Generation::Old => deployment.get_all_old_nodes(Some(true)).await?,
        };
        println!("\n{} ({})", section, nodes.len());
        for node in nodes {
            let assessment = if node.is_running {
                Some(deployment.nodes().assess(&node).await)
            } else {
                None
            };
            println!("  {}", status_label(&node, assessment.as_ref()));
        }
    }
    Ok(())
}
