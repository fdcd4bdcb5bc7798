use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;
use tracing::error;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use circadiand::CircadianController;
use circadiand::Config;
use circadiand::Engine;
use circadiand::api;
use circadiand::sched::CommandSink;
use circadiand::sched::StateView;

/// Circadian lighting daemon: follows color temperature and brightness
/// sources over the day and drives lights through a rate-limited,
/// priority-ordered action queue.
#[derive(Parser)]
#[command(name = "circadiand", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "circadiand.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check {
        println!("{} is valid", args.config.display());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    info!("circadiand starting");
    info!("Loaded config from: {}", args.config.display());

    // Engine first: integrations register against it, the controller
    // consumes its event stream
    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config)?;
    let events = engine
        .take_events()
        .context("engine event stream already taken")?;
    let engine = Arc::new(engine);

    let states: Arc<dyn StateView> = engine.clone();
    let sink: Arc<dyn CommandSink> = engine.clone();
    let controller = Arc::new(CircadianController::new(
        config.circadian.clone(),
        &config.scheduler,
        states,
        sink,
    ));

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    let controller_task = tokio::spawn(controller.clone().run(events));

    let (api_shutdown_tx, api_shutdown_rx) = oneshot::channel();
    let api_task = config.api.clone().map(|api_config| {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(api_config, controller, api_shutdown_rx).await {
                error!("HTTP API server failed: {}", e);
            }
        })
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    controller.shutdown();
    api_shutdown_tx.send(()).ok();
    if let Some(task) = api_task {
        task.await.ok();
    }
    controller_task.abort();
    engine_task.abort();

    info!("circadiand shutdown complete");
    Ok(())
}
