use clap::Parser;
use tracing::info;

use collector::app::App;
use collector::cli::Args;
use collector::config::Config;
use collector::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    logging::setup_logging(&config, args.tracing.clone());

    let mut app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize application");
            return std::process::ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        jobs = ?args.jobs,
        "starting collector"
    );

    if let Err(e) = app.setup_services(&args.jobs) {
        tracing::error!(error = %e, "failed to set up services");
        return std::process::ExitCode::FAILURE;
    }

    app.start_services();
    app.run().await
}
