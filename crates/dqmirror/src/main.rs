mod client;
mod output;
mod protocol;
mod query_server;
mod telemetry;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dqmirror_core::config::{Config, Mirror};
use dqmirror_core::query::{RunFilters, RunRange, RunsRequest};
use dqmirror_grabber::{RemoteClient, RemoteConfig, Scheduler, SchedulerConfig};
use dqmirror_store::Store;
use tokio::sync::watch;

use crate::client::QueryClient;
use crate::output::{
    print_clients_human, print_cluster_human, print_graph_human, print_info_human,
    print_logs_human, print_run_human, print_runs_human,
};
use crate::protocol::{ApiRequest, ApiResponse};
use crate::query_server::QueryState;
use crate::telemetry::{LogFormat, init_cli_tracing, init_run_tracing};

#[derive(Parser, Debug)]
#[command(name = "dqmirror")]
#[command(about = "Mirror DQM job telemetry into local databases and query it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Query API address of a running `dqmirror run`")]
    addr: Option<String>,

    #[arg(long, global = true, default_value = "production")]
    db: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the grabber loops and the query API")]
    Run {
        #[arg(long, value_enum, default_value_t = RunMode::All)]
        mode: RunMode,
        #[arg(long)]
        playback_db: Option<PathBuf>,
        #[arg(long)]
        production_db: Option<PathBuf>,
        #[arg(long)]
        proxy_url: Option<String>,
        #[arg(long)]
        query_http_addr: Option<String>,
        #[arg(long, help = "Serve the query API only")]
        no_grabber: bool,
    },
    #[command(about = "Timeline of clients over a run range")]
    Runs {
        from: i64,
        to: Option<i64>,
        #[arg(long)]
        bad_only: bool,
        #[arg(long)]
        with_lumi: bool,
    },
    #[command(about = "Per-client status of one run")]
    Mirror { run: i64 },
    #[command(about = "File delivery data of one run")]
    Graph { run: i64 },
    #[command(about = "Database summary and run bounds")]
    Info,
    #[command(about = "Client names seen in a run range")]
    Clients { from: i64, to: Option<i64> },
    #[command(about = "Start and end of a job's log")]
    Logs { id: String },
    #[command(about = "Latest up/down state of the cluster hosts")]
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    Playback,
    Production,
    All,
}

impl RunMode {
    fn mirrors(self) -> Vec<Mirror> {
        match self {
            Self::Playback => vec![Mirror::Playback],
            Self::Production => vec![Mirror::Production],
            Self::All => Mirror::ALL.to_vec(),
        }
    }
}

struct RunOverrides {
    playback_db: Option<PathBuf>,
    production_db: Option<PathBuf>,
    proxy_url: Option<String>,
    query_http_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let req = match cli.command {
        Commands::Run {
            mode,
            playback_db,
            production_db,
            proxy_url,
            query_http_addr,
            no_grabber,
        } => {
            let overrides = RunOverrides {
                playback_db,
                production_db,
                proxy_url,
                query_http_addr,
            };
            return run_server(mode, overrides, no_grabber).await;
        }
        Commands::Runs {
            from,
            to,
            bad_only,
            with_lumi,
        } => ApiRequest::Runs(RunsRequest {
            range: RunRange::new(from, to.unwrap_or(from)),
            filters: RunFilters {
                bad_only,
                with_lumi_only: with_lumi,
            },
        }),
        Commands::Mirror { run } => ApiRequest::Run { run },
        Commands::Graph { run } => ApiRequest::Graph { run },
        Commands::Info => ApiRequest::Info,
        Commands::Clients { from, to } => {
            ApiRequest::Clients(RunRange::new(from, to.unwrap_or(from)))
        }
        Commands::Logs { id } => ApiRequest::Logs { id },
        Commands::Status => ApiRequest::ClusterStatus,
    };

    init_cli_tracing();
    let mirror = Mirror::from_selector(&cli.db)?;
    let client = QueryClient::connect(cli.addr, &Config::default().query_http_addr)?;
    let response = client.request(mirror, &req).await?;
    print_response(response, cli.json)
}

async fn run_server(
    mode: RunMode,
    overrides: RunOverrides,
    no_grabber: bool,
) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = overrides.playback_db {
        cfg.playback.db_path = v;
    }
    if let Some(v) = overrides.production_db {
        cfg.production.db_path = v;
    }
    if let Some(v) = overrides.proxy_url {
        cfg.proxy_url = v;
    }
    if let Some(v) = overrides.query_http_addr {
        cfg.query_http_addr = v;
    }

    init_run_tracing(LogFormat::from_env());

    let mirrors = mode.mirrors();
    let mut stores = HashMap::new();
    for mirror in &mirrors {
        let path = &cfg.mirror(*mirror).db_path;
        let store = Store::open(path, cfg.pool_size)
            .with_context(|| format!("open {mirror} database {}", path.display()))?;
        stores.insert(*mirror, store);
    }

    eprintln!("dqmirror run");
    for mirror in &mirrors {
        let mc = cfg.mirror(*mirror);
        eprintln!("  {mirror} db: {}", mc.db_path.display());
        eprintln!("  {mirror} hosts: {}", mc.hosts.join(", "));
    }
    eprintln!("  proxy: {}", cfg.proxy_url);
    eprintln!("  query http: {}", cfg.query_http_addr);
    if cfg.secret.is_none() && !no_grabber {
        eprintln!("  warning: DQM_FFF_SECRET is not set");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut grabber_tasks = Vec::new();
    if !no_grabber {
        let remote = RemoteClient::new(RemoteConfig::from(&cfg)).context("build remote client")?;
        let mut scheduler = Scheduler::new(remote, SchedulerConfig::from(&cfg));
        for mirror in &mirrors {
            scheduler.add_mirror(*mirror, stores[mirror].clone(), cfg.hosts_for(*mirror));
        }
        grabber_tasks = scheduler.spawn(shutdown_rx.clone());
    }

    let addr: SocketAddr = cfg
        .query_http_addr
        .parse()
        .with_context(|| format!("invalid query http address {}", cfg.query_http_addr))?;
    let mut query_task = tokio::spawn(query_server::run_query_http_server(
        QueryState::new(stores, cfg.timezone),
        addr,
        shutdown_rx,
    ));

    let early_exit = tokio::select! {
        res = &mut query_task => Some(res),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            None
        }
    };

    let _ = shutdown_tx.send(true);
    for res in futures::future::join_all(grabber_tasks).await {
        if let Err(err) = res {
            tracing::warn!(error = ?err, "grabber task ended abnormally");
        }
    }
    match early_exit {
        Some(res) => res??,
        None => query_task.await??,
    }
    Ok(())
}

fn print_response(response: ApiResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        ApiResponse::Run(v) => print_run_human(&v),
        ApiResponse::Graph(v) => print_graph_human(&v),
        ApiResponse::Runs(v) => print_runs_human(&v),
        ApiResponse::Clients(v) => print_clients_human(&v),
        ApiResponse::Info(v) => print_info_human(&v),
        ApiResponse::Logs(v) => print_logs_human(&v),
        ApiResponse::ClusterStatus(v) => print_cluster_human(&v),
        ApiResponse::Error(e) => anyhow::bail!("query failed: {e}"),
    }
    Ok(())
}
