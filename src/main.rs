use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use scriptd::config::{PeerConfig, ServiceConfig};
use scriptd::executor::{ShellExecutor, SuffixRouter};
use scriptd::grpc::convert::{rule_to_proto, status_from_proto};
use scriptd::grpc::GrpcServer;
use scriptd::proto::script_service_client::ScriptServiceClient;
use scriptd::proto::{
    GetRunStatusRequest, GetRunsStatusRequest, RunOutputRequest, RunScriptRequest,
};
use scriptd::registry::{RunRegistry, RunStatus};

#[derive(Parser, Debug)]
#[command(name = "scriptd")]
#[command(version)]
#[command(about = "A distributed script execution service")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a scriptd server node
    Server(ServerArgs),

    /// Script run management commands
    Script {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ScriptCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Address other nodes and clients use to reach this node
    /// (defaults to 127.0.0.1:<port>)
    #[arg(long)]
    node_addr: Option<String>,

    /// Directory script identifiers resolve against
    #[arg(long, default_value = "scripts")]
    scripts_dir: PathBuf,

    /// Peer addresses (comma-separated, format: "host:port" or
    /// "host:port@group1+group2"). Include this node's own address to have
    /// it participate in cluster-wide requests.
    #[arg(long, default_value = "")]
    peers: String,

    /// Seconds a finished run stays queryable before eviction
    #[arg(long, default_value = "120")]
    grace_secs: u64,

    /// Maximum number of concurrently executing runs
    #[arg(long, default_value = "8")]
    pool_size: usize,

    /// Seconds a cluster-wide fan-out waits for each candidate
    #[arg(long, default_value = "60")]
    fanout_timeout_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RuleArg {
    One,
    All,
}

impl From<RuleArg> for scriptd::dispatch::TargetRule {
    fn from(rule: RuleArg) -> Self {
        match rule {
            RuleArg::One => Self::One,
            RuleArg::All => Self::All,
        }
    }
}

// =============================================================================
// Script Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum ScriptCommands {
    /// Run a script on the cluster
    Run {
        /// Script identifier, relative to the server's scripts directory
        name: String,

        /// Binding variable (format: "key=value", value parsed as JSON when
        /// possible). Repeatable.
        #[arg(long = "var", short = 'v')]
        vars: Vec<String>,

        /// Target rule: run on one candidate or on all of them
        #[arg(long, default_value = "one")]
        rule: RuleArg,

        /// Restrict candidates to a target group
        #[arg(long)]
        group: Option<String>,
    },
    /// Get status of a specific run
    Status {
        /// The run ID (UUID)
        run_id: String,
    },
    /// Print the captured stdout of a run
    Out {
        /// The run ID (UUID)
        run_id: String,
    },
    /// Print the captured stderr of a run
    Err {
        /// The run ID (UUID)
        run_id: String,
    },
    /// List all runs tracked by the cluster
    List,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    if peers_str.is_empty() {
        return Vec::new();
    }

    peers_str
        .split(',')
        .filter_map(|peer| {
            let peer = peer.trim();
            if peer.is_empty() {
                return None;
            }
            match peer.split_once('@') {
                Some((addr, groups)) => Some(PeerConfig {
                    addr: addr.to_string(),
                    groups: groups
                        .split('+')
                        .filter(|g| !g.is_empty())
                        .map(str::to_string)
                        .collect(),
                }),
                None => Some(PeerConfig {
                    addr: peer.to_string(),
                    groups: Vec::new(),
                }),
            }
        })
        .collect()
}

fn parse_vars(vars: &[String]) -> Result<HashMap<String, Value>, Box<dyn std::error::Error>> {
    let mut variables = HashMap::new();
    for var in vars {
        let (key, raw) = var
            .split_once('=')
            .ok_or_else(|| format!("Invalid variable '{}', expected key=value", var))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        variables.insert(key.to_string(), value);
    }
    Ok(variables)
}

async fn create_client(
    args: &ClientArgs,
) -> Result<ScriptServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(ScriptServiceClient::new(channel))
}

fn print_status(status: &RunStatus, output_format: &OutputFormat) {
    match output_format {
        OutputFormat::Json => match serde_json::to_string_pretty(status) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to render status: {}", e),
        },
        OutputFormat::Table => {
            println!("Run ID:  {}", status.uuid);
            println!("Script:  {}", status.name);
            println!("Node:    {}", status.node);
            println!("State:   {}", status.state);
            if let Some(start) = status.start_time {
                println!("Started: {}", start.to_rfc3339());
            }
            if let Some(end) = status.end_time {
                println!("Ended:   {}", end.to_rfc3339());
            }
            if let Some(result) = &status.result {
                println!("Result:  {}", result);
            }
            if let Some(error) = &status.error {
                println!("Error:   {}", error);
            }
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let node_addr = args
        .node_addr
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));

    let mut config = ServiceConfig::new(node_addr, listen_addr);
    config.scripts_root = args.scripts_dir;
    config.peers = parse_peers(&args.peers);
    config.grace_window = Duration::from_secs(args.grace_secs);
    config.worker_pool_size = args.pool_size;
    config.fanout_timeout = Duration::from_secs(args.fanout_timeout_secs);

    tracing::info!(
        node_addr = %config.node_addr,
        listen_addr = %config.listen_addr,
        scripts_root = %config.scripts_root.display(),
        peers = ?config.peers.iter().map(|p| p.addr.clone()).collect::<Vec<_>>(),
        "Starting scriptd node"
    );

    let shell = Arc::new(ShellExecutor::new(config.scripts_root.clone()));
    let executor = Arc::new(SuffixRouter::new().route(".sh", shell.clone()).fallback(shell));
    let registry = Arc::new(RunRegistry::new(&config, executor));
    let server = GrpcServer::new(config, registry);

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping");
        }
    }

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_script_run(
    client: &mut ScriptServiceClient<Channel>,
    name: String,
    vars: Vec<String>,
    rule: RuleArg,
    group: Option<String>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let variables = parse_vars(&vars)?;
    let request = RunScriptRequest {
        name,
        variables: scriptd::grpc::convert::encode_variables(&variables),
        group: group.unwrap_or_default(),
        rule: rule_to_proto(rule.into()) as i32,
        local: false,
    };

    let response = client.run_script(request).await?.into_inner();
    let statuses: Vec<RunStatus> = response
        .statuses
        .into_iter()
        .map(status_from_proto)
        .collect::<Result<_, _>>()?;

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Table => {
            for status in &statuses {
                print_status(status, output_format);
                println!();
            }
        }
    }
    Ok(())
}

async fn handle_script_status(
    client: &mut ScriptServiceClient<Channel>,
    run_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_run_status(GetRunStatusRequest {
            run_id,
            local: false,
        })
        .await?
        .into_inner();
    print_status(&status_from_proto(response)?, output_format);
    Ok(())
}

async fn handle_script_output(
    client: &mut ScriptServiceClient<Channel>,
    run_id: String,
    stderr: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = RunOutputRequest {
        run_id,
        local: false,
    };
    let mut stream = if stderr {
        client.get_run_err(request).await?.into_inner()
    } else {
        client.get_run_out(request).await?.into_inner()
    };

    while let Some(chunk) = stream.message().await? {
        print!("{}", String::from_utf8_lossy(&chunk.content));
    }
    Ok(())
}

async fn handle_script_list(
    client: &mut ScriptServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_runs_status(GetRunsStatusRequest { local: false })
        .await?
        .into_inner();

    let mut statuses: Vec<RunStatus> = response
        .statuses
        .into_values()
        .map(status_from_proto)
        .collect::<Result<_, _>>()?;
    statuses.sort_by(|a, b| a.uuid.cmp(&b.uuid));

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Table => {
            if statuses.is_empty() {
                println!("No runs found.");
            } else {
                println!(
                    "{:<38} {:<12} {:<22} SCRIPT",
                    "RUN ID", "STATE", "NODE"
                );
                println!("{}", "-".repeat(90));
                for status in &statuses {
                    println!(
                        "{:<38} {:<12} {:<22} {}",
                        status.uuid,
                        status.state.to_string(),
                        status.node,
                        status.name
                    );
                }
                println!();
                println!("Showing {} runs", statuses.len());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Script { client, command } => {
            let mut grpc_client = create_client(&client).await?;

            match command {
                ScriptCommands::Run {
                    name,
                    vars,
                    rule,
                    group,
                } => {
                    handle_script_run(&mut grpc_client, name, vars, rule, group, &client.output)
                        .await?;
                }
                ScriptCommands::Status { run_id } => {
                    handle_script_status(&mut grpc_client, run_id, &client.output).await?;
                }
                ScriptCommands::Out { run_id } => {
                    handle_script_output(&mut grpc_client, run_id, false).await?;
                }
                ScriptCommands::Err { run_id } => {
                    handle_script_output(&mut grpc_client, run_id, true).await?;
                }
                ScriptCommands::List => {
                    handle_script_list(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
