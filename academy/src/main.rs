use academy::{
    Application, Config,
    callback::{CallbackOutcome, TracingHost},
    config::{Args, Command},
    http_client, telemetry,
};
use clap::Parser;
use std::{process::ExitCode, sync::Arc};
use url::Url;

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Reconcile a single callback URL against the configured gateway.
async fn run_callback(config: Config, url: &str, code_verifier: Option<String>) -> anyhow::Result<CallbackOutcome> {
    let url = Url::parse(url)?;
    let reconciler = academy::callback_reconciler(&config, code_verifier, Arc::new(TracingHost)).await?;

    let outcome = tokio::select! {
        outcome = reconciler.run(&url) => outcome,
        _ = shutdown_signal() => {
            reconciler.teardown();
            CallbackOutcome::Cancelled
        }
    };

    Ok(outcome)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before anything else that might build a TLS client
    http_client::install_crypto_provider();

    // Parse CLI args
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    let exit = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Run the application with graceful shutdown on SIGTERM/Ctrl+C
            Application::new(config).await?.serve(shutdown_signal()).await?;
            ExitCode::SUCCESS
        }
        Command::Callback { url, code_verifier } => match run_callback(config, &url, code_verifier).await? {
            CallbackOutcome::Redirected { user_id, role, to } => {
                println!("Signed in {user_id} ({role:?}), redirected to {to}");
                ExitCode::SUCCESS
            }
            CallbackOutcome::Failed(error) => {
                println!("Callback failed: {}", error.status_message());
                ExitCode::FAILURE
            }
            other => {
                println!("Callback did not complete: {other:?}");
                ExitCode::FAILURE
            }
        },
    };

    telemetry::shutdown_telemetry();
    Ok(exit)
}
