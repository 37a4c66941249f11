mod report;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn, Level};
use uuid::Uuid;

use asamblea_client::{ClientConfig, HttpBackend};

/// Drives the assembly backend interface at scale and writes a JSON report
/// of per-operation latency percentiles and failure counts.
#[derive(Debug, Parser)]
#[command(name = "asamblea-stress", version, about)]
struct Args {
    /// Simulated attendees.
    #[arg(long, default_value_t = 25)]
    users: usize,
    /// Seconds over which attendee starts are spread.
    #[arg(long, default_value_t = 10)]
    ramp_seconds: u64,
    /// Remove the attendance rows created by the run.
    #[arg(long)]
    cleanup: bool,
    /// Report file name; `.json` is appended.
    #[arg(long, default_value = "stress-web-asamblea")]
    report_name: String,
    /// Fraction of votes cast as "si".
    #[arg(long, default_value_t = 0.7)]
    vote_ratio_si: f64,
    /// Target assembly id.
    #[arg(long, env = "ASAMBLEA_ID")]
    asamblea_id: Uuid,
    /// Assembly access code forwarded to the backend.
    #[arg(long, env = "ASAMBLEA_CODIGO")]
    codigo: Option<String>,
    /// Backend base URL.
    #[arg(long, env = "ASAMBLEA_BASE_URL", default_value = "http://127.0.0.1:54321")]
    base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.vote_ratio_si),
        "--vote-ratio-si must be within 0.0..=1.0"
    );

    let config = ClientConfig {
        base_url: args.base_url.clone(),
        codigo: args.codigo.clone(),
        ..ClientConfig::default()
    };
    let backend = Arc::new(HttpBackend::new(&config)?);

    let options = runner::RunOptions {
        users: args.users,
        ramp: Duration::from_secs(args.ramp_seconds),
        cleanup: args.cleanup,
        vote_ratio_si: args.vote_ratio_si,
        assembly: args.asamblea_id,
        vote_wait: Duration::from_secs(60),
    };

    let started_at = chrono::Utc::now();
    info!(
        users = args.users,
        ramp_seconds = args.ramp_seconds,
        asamblea = %args.asamblea_id,
        "starting stress run"
    );

    let recorder = tokio::select! {
        outcome = runner::run(backend, options) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; no report written");
            return Ok(());
        }
    };

    let report = recorder.finish(report::RunMeta {
        users: args.users,
        ramp_seconds: args.ramp_seconds,
        vote_ratio_si: args.vote_ratio_si,
        asamblea_id: args.asamblea_id,
        started_at,
        finished_at: chrono::Utc::now(),
    });

    let path = format!("{}.json", args.report_name);
    let body = serde_json::to_vec_pretty(&report).context("serialize report")?;
    std::fs::write(&path, body).with_context(|| format!("write report {path}"))?;
    info!(path = %path, "stress report written");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
