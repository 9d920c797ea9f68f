use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use venue_arb_engine::{
    config::Config,
    engine::{console::HELP, ArbitrageEngine, EngineCommand},
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    let level = config
        .as_ref()
        .ok()
        .and_then(|c| c.logging.level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting cross-venue arbitrage engine");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    let mut engine = ArbitrageEngine::new(config).await.map_err(|e| {
        error!("Failed to initialize engine: {}", e);
        e
    })?;
    engine.start().await?;
    info!("{}", HELP);

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut maintenance = tokio::time::interval(MAINTENANCE_INTERVAL);
    maintenance.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                engine.stop().await;
                break;
            }
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<EngineCommand>() {
                    Ok(command) => {
                        if !engine.handle_command(command).await {
                            break;
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    info!("Console input closed, running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    stdin_open = false;
                }
            },
            _ = maintenance.tick() => {
                if let Err(e) = engine.perform_maintenance().await {
                    warn!("Maintenance failed: {}", e);
                }
            }
        }
    }

    info!("Arbitrage engine shutdown complete");
    Ok(())
}
