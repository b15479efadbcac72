// mocksmithd: storage API and engine supervisor.

use anyhow::Context;
use clap::Parser;
use mocksmith_daemon::{api, bootstrap, config::DaemonConfig, supervisor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mocksmithd", version, about = "Mock API storage daemon and engine supervisor")]
struct Args {
    /// Extra arguments passed through to the engine.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    engine_args: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::from_env().with_extra_engine_args(args.engine_args);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(data_dir = %config.data_dir.display(), "starting mocksmith daemon");

    let report = bootstrap::reconcile(&config).await.context("bootstrap reconciliation failed")?;
    let app = api::router(&config);
    let code = supervisor::supervise(&config, &report, app)
        .await
        .context("supervisor terminated unexpectedly")?;

    std::process::exit(code);
}
