use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use garden_kubehub::{get_kube_client, KubeProjects, KubeServiceAccounts};
use garden_members::{self as members, Backends, Member, MemberError, MemberRequest, MembersConfig};
use serde_json::json;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gardenctl-members", version, about = "Manage Gardener project members")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Project namespace, e.g. "garden-foo"
    #[arg(long = "ns", global = true, env = "GARDEN_NAMESPACE")]
    namespace: String,

    /// Acting user recorded as creator of new service accounts
    #[arg(long = "user", global = true, env = "GARDEN_USER", default_value = "system:admin")]
    user: String,

    /// YAML config file; GARDEN_* variables still override it
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List members, including service accounts without membership
    List,
    /// Show one member; own service accounts come with a kubeconfig
    Get {
        /// Username, e.g. "foo@example.org" or "system:serviceaccount:garden-foo:robot"
        name: String,
    },
    /// Add a member
    Create {
        name: String,
        /// Role to grant (repeatable)
        #[arg(short = 'r', long = "role")]
        roles: Vec<String>,
        /// Service account description
        #[arg(long = "description")]
        description: Option<String>,
    },
    /// Replace a member's roles
    Update {
        name: String,
        #[arg(short = 'r', long = "role")]
        roles: Vec<String>,
        #[arg(long = "description")]
        description: Option<String>,
    },
    /// Remove a member (and its service account, if owned by the project)
    Delete { name: String },
    /// Recreate a service account, invalidating its tokens
    Reset { name: String },
}

fn init_tracing() {
    let env = std::env::var("GARDEN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GARDEN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GARDEN_METRICS_ADDR; expected host:port");
        }
    }
}

fn body(roles: Vec<String>, description: Option<String>) -> serde_json::Value {
    let mut v = json!({ "roles": roles });
    if let Some(d) = description {
        v["description"] = json!(d);
    }
    v
}

fn print_member(m: &Member) {
    let mut flags = Vec::new();
    if m.is_orphaned() {
        flags.push("orphaned");
    }
    if m.extensions.deletion_timestamp.is_some() {
        flags.push("terminating");
    }
    let roles = if m.roles.is_empty() { "-".to_string() } else { m.roles.join(",") };
    let created_by = m.extensions.created_by.as_deref().unwrap_or("-");
    println!("{} • {} • {} {}", m.username, roles, created_by, flags.join(" "));
}

fn print_members(output: Output, list: &[Member]) -> Result<()> {
    match output {
        Output::Human => list.iter().for_each(print_member),
        Output::Json => println!("{}", serde_json::to_string_pretty(list)?),
    }
    Ok(())
}

fn print_single(output: Output, m: &Member) -> Result<()> {
    match output {
        Output::Human => {
            print_member(m);
            if let Some(d) = &m.extensions.description {
                println!("description: {}", d);
            }
            if let Some(kc) = &m.extensions.kubeconfig {
                println!("---\n{}", kc);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(m)?),
    }
    Ok(())
}

async fn run(command: Commands, output: Output, backends: &Backends, config: &MembersConfig, req: MemberRequest) -> Result<()> {
    match command {
        Commands::List => print_members(output, &members::list(backends, config, req).await?),
        Commands::Get { name } => print_single(output, &members::get(backends, config, req.name(name)).await?),
        Commands::Create { name, roles, description } => {
            let list = members::create(backends, config, req.name(name).body(body(roles, description))).await?;
            print_members(output, &list)
        }
        Commands::Update { name, roles, description } => {
            let m = members::update(backends, config, req.name(name).body(body(roles, description))).await?;
            print_single(output, &m)
        }
        Commands::Delete { name } => print_members(output, &members::remove(backends, config, req.name(name)).await?),
        Commands::Reset { name } => match members::reset_service_account(backends, config, req.name(name.clone())).await? {
            Some(m) => print_single(output, &m),
            None => {
                eprintln!("no member {}; nothing to reset", name);
                Ok(())
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let Cli { output, namespace, user, config, command } = Cli::parse();

    let config = match config {
        Some(path) => MembersConfig::from_file(&path)?,
        None => MembersConfig::from_env(),
    };
    let client = get_kube_client().await?;
    let backends = Backends {
        projects: Arc::new(KubeProjects::new(client.clone())),
        service_accounts: Arc::new(KubeServiceAccounts::new(client)),
    };
    info!(ns = %namespace, user = %user, "gardenctl-members invoked");
    let req = MemberRequest::new(user, namespace.clone());

    let res = run(command, output, &backends, &config, req).await;
    if let Err(e) = &res {
        let status = e.downcast_ref::<MemberError>().map(|m| m.status_code()).unwrap_or(500);
        error!(error = %e, status, "member operation failed");
    }
    res.with_context(|| format!("namespace {}", namespace))
}
