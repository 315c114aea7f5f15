use anyhow::Context;
use clap::{Parser, Subcommand};
use keyspider::exporter::Format;
use keyspider::hub::Hub;
use keyspider::spider::Spider;
use keyspider::watcher::Watcher;
use keyspider::{api, config, logging, worker};
use keyspider_sql::migrations;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Keyspider discovers and records SSH access relationships across a fleet
/// of hosts reachable from this jump server.
#[derive(Debug, Parser)]
#[command(name = "keyspiderd", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long = "config", env = "KEYSPIDER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[clap(flatten)]
    log_args: logging::LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon: apply migrations, start the watchers and the scan
    /// worker, and serve the API.
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Run the scan pipeline directly against a target host.
    Scan {
        /// Destination host to scan.
        #[arg(long)]
        host: String,
        /// How far back to scan logs.
        #[arg(long, value_parser = humantime::parse_duration, default_value = "168h")]
        since: Duration,
        /// How many hops to expand from the target through observed sources.
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Export the access graph.
    Export {
        /// Export format: json|csv|graphml
        #[arg(long, default_value = "json")]
        format: String,
        /// Output path (or - for stdout).
        #[arg(long, default_value = "-")]
        out: String,
        /// Max rows for hosts/edges.
        #[arg(long, default_value_t = 10_000)]
        limit: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(cli));
    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let cfg = Arc::new(config::load(cli.config.as_deref())?);
    let pool = open_pool(&cfg).await?;

    match cli.command {
        Command::Migrate => migrations::apply(&pool).await,
        Command::Serve => serve(cfg, pool).await,
        Command::Scan { host, since, depth } => {
            migrations::apply(&pool).await?;
            let spider = Spider::new(cfg, pool);
            let outcome = spider.scan_host(&host, since, depth).await?;
            println!(
                "host={} events_inserted={} keys_seen={} hosts_visited={} edges_upserted={} concerns_raised={}",
                host,
                outcome.events_inserted,
                outcome.keys_seen,
                outcome.hosts_visited,
                outcome.edges_upserted,
                outcome.concerns_raised,
            );
            Ok(())
        }
        Command::Export { format, out, limit } => {
            migrations::apply(&pool).await?;
            let format = Format::parse(&format)
                .with_context(|| format!("unknown format {format:?} (use json|csv|graphml)"))?;
            let body = keyspider::exporter::export_graph(format, limit, &pool).await?;
            if out == "-" {
                use std::io::Write;
                std::io::stdout().write_all(&body)?;
            } else {
                std::fs::write(&out, &body).with_context(|| format!("write {out}"))?;
            }
            Ok(())
        }
    }
}

async fn open_pool(cfg: &config::Config) -> anyhow::Result<sqlx::PgPool> {
    let options = cfg
        .db
        .dsn
        .parse::<sqlx::postgres::PgConnectOptions>()
        .context("parsing db.dsn")?
        .application_name("keyspiderd");
    sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .context("connecting to database")
}

async fn serve(cfg: Arc<config::Config>, pool: sqlx::PgPool) -> anyhow::Result<()> {
    migrations::apply(&pool).await?;

    let hub = Arc::new(Hub::new());
    let shutdown = CancellationToken::new();

    // Cancel all background work on SIGINT or SIGTERM; the http server
    // shares the same token for its graceful drain.
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("caught signal; shutting down");
        signal_token.cancel();
    });

    let watcher = Arc::new(Watcher::new(cfg.clone(), pool.clone(), hub.clone()));
    let watcher_task = tokio::spawn(watcher.run(shutdown.clone()));
    let worker_task = tokio::spawn(worker::serve(cfg.clone(), pool.clone(), shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&cfg.api.listen)
        .await
        .with_context(|| format!("bind api listener on {}", cfg.api.listen))?;
    tracing::info!(listen = %cfg.api.listen, "keyspiderd serving");

    let app = api::router(api::AppState {
        pool: pool.clone(),
        hub,
    });
    let drain = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain.cancelled().await })
        .await
        .context("api server")?;

    shutdown.cancel();
    let _ = watcher_task.await;
    match worker_task.await {
        Ok(result) => result?,
        Err(err) => tracing::warn!(error = %err, "worker task panicked"),
    }
    Ok(())
}
