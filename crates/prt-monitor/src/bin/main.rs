//! PRT monitor CLI
//!
//! Usage:
//!   prt-monitor decode ':AQAh...:'
//!   prt-monitor process --key-url https://keys.example/prt/v1 --input observed.txt
//!   prt-monitor serve --key-url https://keys.example/prt/v1 --listen 127.0.0.1:8787

use std::collections::BTreeMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use prt_core::decode_header;
use prt_monitor::tabs::PrtTokenView;
use prt_monitor::{
    create_router, init_prometheus_recorder, AppState, MonitorConfig, PrtPipeline, TabId,
};

#[derive(Parser, Debug)]
#[command(name = "prt-monitor")]
#[command(about = "Decode, decrypt and tally Probabilistic Reveal Tokens")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a header value without decrypting it
    Decode {
        /// Header value, with or without the `:` delimiters
        header: String,
    },

    /// Run observations from a file (or stdin) and print the statistics
    Process {
        /// Endpoint serving `{epochIdBase64}.json` key documents
        #[arg(long)]
        key_url: String,

        /// Lines of `tab_id origin header`; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Per-fetch key timeout in milliseconds
        #[arg(long, default_value_t = prt_client::DEFAULT_FETCH_TIMEOUT_MS)]
        timeout_ms: u64,
    },

    /// Run the HTTP API
    Serve {
        /// JSON config file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        key_url: Option<String>,

        /// Script-blocking domain list document
        #[arg(long)]
        domain_list_url: Option<String>,

        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Do not install the Prometheus recorder
        #[arg(long)]
        no_metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decode { header } => decode(&header),
        Command::Process {
            key_url,
            input,
            timeout_ms,
        } => {
            let mut config = MonitorConfig::new(key_url);
            config.key_fetch_timeout_ms = timeout_ms;
            process(&config, input).await
        }
        Command::Serve {
            config,
            key_url,
            domain_list_url,
            listen,
            no_metrics,
        } => {
            let mut config = match (config, key_url.as_deref()) {
                (Some(path), _) => MonitorConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                (None, Some(url)) => MonitorConfig::new(url),
                (None, None) => bail!("either --config or --key-url is required"),
            };
            if let Some(url) = key_url {
                config.key_base_url = url;
            }
            if domain_list_url.is_some() {
                config.domain_list_url = domain_list_url;
            }
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            if no_metrics {
                config.enable_metrics = false;
            }
            serve(config).await
        }
    }
}

fn decode(header: &str) -> Result<()> {
    let token = decode_header(header)?;
    println!("{}", serde_json::to_string_pretty(&PrtTokenView::from(&token))?);
    Ok(())
}

/// One parsed input line
struct Observation {
    tab_id: TabId,
    origin: String,
    header: String,
}

fn parse_observations(text: &str) -> Vec<Observation> {
    let mut observations = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let parsed = match (parts.next(), parts.next(), parts.next()) {
            (Some(tab), Some(origin), Some(header)) => tab.parse::<TabId>().ok().map(|tab_id| {
                Observation {
                    tab_id,
                    origin: origin.to_string(),
                    header: header.to_string(),
                }
            }),
            _ => None,
        };

        match parsed {
            Some(observation) => observations.push(observation),
            None => tracing::warn!(line = line_no + 1, "Skipping malformed input line"),
        }
    }
    observations
}

async fn process(config: &MonitorConfig, input: Option<PathBuf>) -> Result<()> {
    let text = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let observations = parse_observations(&text);
    let pipeline = PrtPipeline::from_config(config)?;

    let results = futures::future::join_all(
        observations
            .iter()
            .map(|o| pipeline.process(o.tab_id, &o.origin, &o.header)),
    )
    .await;

    let mut failures: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut decrypted = 0usize;
    for result in &results {
        match result {
            Ok(_) => decrypted += 1,
            Err(e) => *failures.entry(e.kind()).or_default() += 1,
        }
    }
    tracing::info!(
        observed = results.len(),
        decrypted,
        failed = results.len() - decrypted,
        "Processed observations"
    );

    let mut tabs: Vec<TabId> = observations.iter().map(|o| o.tab_id).collect();
    tabs.sort_unstable();
    tabs.dedup();
    let local_views: BTreeMap<String, _> = tabs
        .into_iter()
        .filter_map(|tab| {
            pipeline
                .stats()
                .local_view(tab)
                .map(|view| (tab.to_string(), view))
        })
        .collect();

    let report = serde_json::json!({
        "globalView": pipeline.stats().global_view(),
        "localViews": local_views,
        "failures": failures,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config: MonitorConfig) -> Result<()> {
    let metrics = if config.enable_metrics {
        Some(init_prometheus_recorder()?)
    } else {
        None
    };

    let pipeline = Arc::new(PrtPipeline::from_config(&config)?);

    let refresher = config.domain_list_url.as_ref().map(|url| {
        tracing::info!(
            url = %url,
            period_secs = config.domain_refresh_secs,
            "Starting domain list refresher"
        );
        Arc::clone(pipeline.classifier()).spawn_refresher(config.domain_refresh_period())
    });

    let state = Arc::new(AppState { pipeline, metrics });
    let app = create_router(state);

    tracing::info!(
        addr = %config.listen_addr,
        key_url = %config.key_base_url,
        "Starting PRT monitor"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = refresher {
        handle.abort();
    }
    tracing::info!("PRT monitor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
