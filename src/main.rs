use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use fleetd::cli::Args;
use fleetd::{app, logging};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut app = match app::App::new().await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("failed to initialize application: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    logging::setup_logging(app.config(), args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        port = app.config().port,
        max_sessions = app.config().max_sessions,
        "starting fleetd"
    );

    if let Err(e) = app.setup_services().await {
        error!(error = ?e, "failed to set up services");
        return ExitCode::FAILURE;
    }

    app.start_services();
    app.run().await
}
