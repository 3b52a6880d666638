//! migration-operator - controller for cross-cluster StatefulSet migrations.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the local Kubernetes client and the EBS client
//! - Starts the controller and waits for a shutdown signal

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use migration_operator::ebs::EbsClient;
use migration_operator::run_controller;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("migration_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting migration-operator");

    // Create the client for the local (management) cluster
    let client = Client::try_default().await?;
    info!("Connected to local Kubernetes cluster");

    // Region resolution (AWS_REGION / AWS_DEFAULT_REGION / profile) is
    // handled by the SDK's default provider chain
    let aws_config = aws_config::load_from_env().await;
    let ebs = EbsClient::new(&aws_config);
    info!(region = ?aws_config.region(), "EBS client ready");

    let controller_handle = tokio::spawn(run_controller(client, ebs));

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut
/// down gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
