use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod simulator;

fn main() -> Result<()> {
    // RUST_LOG=debug shows every drained action and subscription change
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();

    info!("VidLink Receiver v{}", env!("CARGO_PKG_VERSION"));

    let (config, run_for) = app::load_settings()?;
    match app::run(config, run_for) {
        Ok(summary) => {
            info!("VidLink Receiver exited cleanly: {}", summary);
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}
