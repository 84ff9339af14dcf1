//! redis-operator entry point.
//!
//! Parses the operator configuration, sets up JSON logging, serves health
//! probes, and runs the topology controllers once this replica holds the
//! leader lease.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use redis_operator::OperatorConfig;
use redis_operator::health::{HealthState, run_health_server};
use redis_operator::run_controllers;

const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight passes after a shutdown signal.
const DRAIN_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();
    init_tracing()?;
    info!(?config, "Starting redis-operator");

    let client = Client::try_default().await?;
    let identity = ReplicaIdentity::from_env();
    info!(
        holder = %identity.holder,
        namespace = %identity.namespace,
        lease = %config.lease_name,
        "Connected; contending for the operator lease"
    );

    // Probes answer before and after leadership
    let health_state = Arc::new(HealthState::new());
    let health_task = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!(error = %e, port, "Health server stopped");
            }
        })
    };

    let lease = identity.lease(&client, &config.lease_name);
    wait_for_lease(&lease).await;
    let renewal_task = tokio::spawn(keep_lease(
        identity.lease(&client, &config.lease_name),
        health_state.clone(),
    ));

    let controllers_task = {
        let health_state = health_state.clone();
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_controllers(client, Some(health_state), config).await;
        })
    };

    tokio::select! {
        result = controllers_task => {
            if let Err(e) = result {
                error!(error = %e, "Topology controllers panicked");
            }
        }
        result = health_task => {
            if let Err(e) = result {
                error!(error = %e, "Health server panicked");
            }
        }
        // Returns only by panicking; a lost lease exits the process
        Err(e) = renewal_task => {
            error!(error = %e, "Lease renewal panicked");
        }
        _ = shutdown_signal() => {
            health_state.set_ready(false).await;
            info!(drain = ?DRAIN_PERIOD, "Shutdown requested; draining in-flight passes");
            tokio::time::sleep(DRAIN_PERIOD).await;
        }
    }

    info!("redis-operator stopped");
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redis_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();
    Ok(())
}

/// Who this replica is, for the lease.
struct ReplicaIdentity {
    holder: String,
    namespace: String,
}

impl ReplicaIdentity {
    /// Downward-API `POD_NAME`/`POD_NAMESPACE`, falling back to the hostname
    /// and `default` outside a pod.
    fn from_env() -> Self {
        let holder = std::env::var("POD_NAME").unwrap_or_else(|_| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "redis-operator".to_string());
            warn!(holder = %host, "POD_NAME not set, holding the lease as the hostname");
            host
        });
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, placing the lease in 'default'");
            "default".to_string()
        });
        Self { holder, namespace }
    }

    fn lease(&self, client: &Client, lease_name: &str) -> LeaseLock {
        LeaseLock::new(
            client.clone(),
            &self.namespace,
            LeaseLockParams {
                holder_id: self.holder.clone(),
                lease_name: lease_name.to_string(),
                lease_ttl: LEASE_TTL,
            },
        )
    }
}

/// Block until the lease is ours.
async fn wait_for_lease(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Lease acquired; starting topology controllers");
                return;
            }
            Ok(_) => info!("Lease held by another replica"),
            Err(e) => warn!(error = %e, "Lease request failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever. Losing it ends the process so that the pod
/// restarts as a follower instead of reconciling alongside the new leader.
#[allow(clippy::exit)]
async fn keep_lease(lease: LeaseLock, health_state: Arc<HealthState>) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        let lost = match lease.try_acquire_or_renew().await {
            Ok(result) => !result.acquired_lease,
            Err(e) => {
                error!(error = %e, "Lease renewal failed");
                true
            }
        };
        if lost {
            error!("Operator lease lost; exiting");
            health_state.set_ready(false).await;
            std::process::exit(1);
        }
    }
}

/// Resolves on SIGTERM or Ctrl+C.
///
/// Without signal handlers there is no graceful shutdown at all, so failing
/// to install one aborts startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("installing the Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("installing the SIGTERM handler")
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
