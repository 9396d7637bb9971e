//! Optional Prometheus exposition of the engine's counters.
//!
//! Exposition is off by default and enabled through [`MetricsConfig`]; with
//! no recorder installed the `metrics` macros are no-ops. When enabled, the
//! configured address serves the counter families the engine emits:
//!
//! - `squall_elements_consumed_total{operator}` — rows or bytes a node took
//!   in from its upstream
//! - `squall_elements_delivered_total{operator}` and
//!   `squall_batches_delivered_total{operator}` — deliveries between nodes
//! - `squall_diagnostics_total{severity}` — diagnostics seen by the bus
//! - `squall_pipelines_completed_total{status}` — pipeline outcomes

use std::net::SocketAddr;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::MetricsConfig;
use crate::error::{MetricsAddressSnafu, MetricsError, PrometheusInitSnafu};

/// Install the Prometheus recorder and serve its rendering at
/// `http://<address>/metrics`.
///
/// A disabled config is a no-op: counters stay unrecorded and no socket is
/// bound.
pub fn init(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }
    let addr: SocketAddr = config.address.parse().context(MetricsAddressSnafu {
        address: config.address.clone(),
    })?;
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(serve(addr, handle));

    Ok(())
}

/// Serve the recorder's rendering until the process exits.
async fn serve(addr: SocketAddr, handle: PrometheusHandle) {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind metrics endpoint {addr}: {e}");
            return;
        }
    };
    info!("serving pipeline metrics on http://{addr}/metrics");

    if let Err(e) = axum::serve(listener, app).await {
        error!("metrics endpoint failed: {e}");
    }
}
