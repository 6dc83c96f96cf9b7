//! idmigrate command-line tool.
//!
//! Runs one migration phase per invocation against a PostgreSQL database.

mod commands;
mod config;
mod formatter;

use clap::Parser;
use idmigrate_core::StopSignal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Args;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idmigrate=info,idmigrate_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?config.command,
        dry_run = config.migration.dry_run,
        "starting idmigrate"
    );

    // Ctrl-C lets the current unit finish, then stops the phase.
    let stop = StopSignal::new();
    let handle = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::warn!("received stop signal, finishing current unit");
        handle.stop();
    });

    let formatter = formatter::create_formatter(config.format);
    match commands::run(&config, &*formatter, stop).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            tracing::error!(error = %e, "idmigrate failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
