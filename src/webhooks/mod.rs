mod config;
mod handle_common;
mod handle_eviction;
mod tls;
mod try_bind;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use eyre::Result;
use k8s_openapi::api::policy::v1::Eviction;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionReview;
use kube::runtime::events::{Recorder, Reporter};
use tracing::info;

use crate::api_resolver::ApiResolver;
use crate::config::Config;
use crate::consts::{CONTROLLER_NAME, EVICTION_WEBHOOK_PATH};
use crate::reflector::Stores;
use crate::shutdown::Shutdown;
use crate::spawn_service::spawn_service;
pub use crate::webhooks::config::WebhookConfig;
use crate::webhooks::handle_common::{HandlerResult, handle_common};
use crate::webhooks::handle_eviction::eviction_handler;
use crate::webhooks::tls::build_rustls_config;
use crate::webhooks::try_bind::try_bind;
use crate::ServiceRegistry;

const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Start the admission webhook that intercepts pod eviction requests.
pub async fn start_webhook(
    api_resolver: &ApiResolver,
    config: Config,
    webhook_config: WebhookConfig,
    stores: Stores,
    service_registry: &ServiceRegistry,
    shutdown: &Shutdown,
) -> Result<SocketAddr> {
    let recorder = Recorder::new(
        api_resolver.client.clone(),
        Reporter {
            controller: String::from(CONTROLLER_NAME),
            instance: None,
        },
    );

    let app = Router::new()
        .route(EVICTION_WEBHOOK_PATH, post(eviction_webhook_handler))
        .with_state(AppState {
            api_resolver: api_resolver.clone(),
            config,
            stores,
            recorder,
        });

    let rustls_config = build_rustls_config(&webhook_config.cert).await?;

    let listener = try_bind(&webhook_config.bind).await?;
    let local_addr = listener.local_addr()?;
    info!("listening {}", local_addr);

    let handle = axum_server::Handle::new();
    let server = axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
        .handle(handle.clone())
        .serve(app.into_make_service());

    tokio::spawn({
        let shutdown = shutdown.clone();
        let handle = handle.clone();
        async move {
            shutdown.wait_drain_triggered().await;
            handle.graceful_shutdown(Some(DRAIN_GRACE_PERIOD));
            shutdown.wait_drain_complete().await;
        }
    });

    let signal = service_registry.register("webhook");
    spawn_service(shutdown, "webhook", {
        let shutdown = shutdown.clone();
        async move {
            let _drain_token = shutdown.delay_drain_token();
            signal.ready();
            server.await.unwrap();
        }
    })?;

    Ok(local_addr)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api_resolver: ApiResolver,
    pub(crate) config: Config,
    pub(crate) stores: Stores,
    pub(crate) recorder: Recorder,
}

async fn eviction_webhook_handler(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<Eviction>>,
) -> HandlerResult<AdmissionReview<DynamicObject>> {
    handle_common(eviction_handler, state, review).await
}
