use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use eyre::Result;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::service_registry::ServiceRegistry;
use crate::shutdown::Shutdown;
use crate::spawn_service::spawn_service;

/// Serves `/healthz` on its own plain-HTTP listener, following the
/// controller-runtime manager convention of a health-probe port separate
/// from the (TLS) webhook port.
pub async fn start_health_probe(
    bind: SocketAddr,
    service_registry: &ServiceRegistry,
    shutdown: &Shutdown,
) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .with_state(service_registry.clone());

    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!("health probe listening {}", local_addr);

    let signal = service_registry.register("health-probe");
    spawn_service(shutdown, "health-probe", {
        let shutdown = shutdown.clone();
        async move {
            signal.ready();
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { shutdown.wait_shutdown_triggered().await })
                .await
                .unwrap();
        }
    })?;

    Ok(local_addr)
}

async fn healthz_handler(State(service_registry): State<ServiceRegistry>) -> (StatusCode, Json<Value>) {
    let not_ready = service_registry.get_not_ready_services();
    let status_code = if not_ready.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(json!({ "not_ready": not_ready })))
}

/// Serves `/metrics`. No metrics are recorded yet — see DESIGN.md — this
/// only honors the bind-address contract controller-runtime users expect
/// from a manager, the same stub teacher's own `/merics` route served
/// before this crate split health and metrics onto their own ports.
pub async fn start_metrics(bind: SocketAddr, shutdown: &Shutdown) -> Result<SocketAddr> {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!("metrics listening {}", local_addr);

    spawn_service(shutdown, "metrics", {
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { shutdown.wait_shutdown_triggered().await })
                .await
                .unwrap();
        }
    })?;

    Ok(local_addr)
}

async fn metrics_handler() -> StatusCode {
    // TODO: wire a real registry once this crate defines counters worth exporting.
    StatusCode::OK
}
