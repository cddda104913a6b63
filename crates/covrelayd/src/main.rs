use anyhow::Result;
use clap::Parser;
use covrelayd::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    covrelay_core::telemetry::init_tracing(config.json, config.level());

    if let Err(e) = covrelayd::run(config).await {
        tracing::error!(error = %format!("{e:#}"), "covrelayd exited");
        return Err(e);
    }
    Ok(())
}
