use anyhow::{Context, Result};
use porichoy::{agent, cli::config_path_from_args, config::Config, logging::init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let logging_guard = init_tracing(&config.logging).context("failed to initialize logging")?;

    eprintln!(
        "porichoy running (run id {}); press q then Enter to stop",
        logging_guard.run_id()
    );
    let result = agent::run(config).await;
    if let Err(err) = &result {
        tracing::error!(target: "agent", error = %format!("{err:#}"), "agent_failed");
    }

    drop(logging_guard);
    result
}
