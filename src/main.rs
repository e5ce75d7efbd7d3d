//! redis-operator - A Kubernetes operator for highly-available Redis.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Parses the controller flags
//! - Creates the Kubernetes client
//! - Starts the controller and the health/metrics server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info};

use redis_operator::controller::context::ControllerConfig;
use redis_operator::health::{HealthState, run_health_server};
use redis_operator::run_controller_scoped;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "redis-operator")]
#[command(about = "Kubernetes operator for highly-available Redis clusters")]
struct Args {
    /// Maximum number of concurrent reconciles
    #[arg(long = "ctr-maxconcurrent", default_value_t = 4)]
    ctr_maxconcurrent: usize,

    /// Delay in seconds between reconciles of a healthy cluster
    #[arg(long = "ctr-reconciletime", default_value_t = 60)]
    ctr_reconciletime: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redis_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting redis-operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // WATCH_NAMESPACE confines the controller to one namespace; unset
    // means cluster-wide.
    let namespace = std::env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());
    match &namespace {
        Some(ns) => info!(namespace = %ns, "Watching single namespace"),
        None => info!("Watching all namespaces"),
    }

    let config = ControllerConfig {
        max_concurrent_reconciles: args.ctr_maxconcurrent,
        reconcile_time: Duration::from_secs(args.ctr_reconciletime),
        cluster_scoped: namespace.is_none(),
    };

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server (probes should work before the controller is ready)
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Start controller
    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        tokio::spawn(async move {
            run_controller_scoped(
                controller_client,
                Some(health_state),
                config,
                namespace.as_deref(),
            )
            .await;
        })
    };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new work
            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            // Give in-flight reconciliations time to complete
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
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
