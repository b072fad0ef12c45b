use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use color_eyre::config::Frame;
use eyre::Result;
use tokio::select;
use tracing::{Level, debug, error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter::Directive};

use pdb_watch_operator::{
    ApiResolver, Config, ServiceRegistry, Shutdown, WebhookConfig, acquire_and_hold,
    pod_identity, start_controller, start_health_probe, start_metrics, start_reflectors,
    start_webhook,
};

const LEADER_LEASE_NAME: &str = "pdb-watch-operator";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let config = Config::parse();

    init_tracing_subscriber()?;
    install_color_eyre()?;

    print_build_info();

    let shutdown = Shutdown::new();
    if let Err(err) = try_main(config, &shutdown).await {
        error!(?err, "Failed to start server");
        shutdown.trigger_shutdown();
    }

    shutdown.wait_shutdown_triggered().await;

    select! {
        _ = shutdown.wait_shutdown_complete() => {},
        _ = tokio::time::sleep(Duration::from_secs(1)) => {
            info!("Waiting for graceful shutdown");
            shutdown.wait_shutdown_complete().await;
        }
    }

    info!("Bye!");
    Ok(ExitCode::from(1))
}

async fn try_main(config: Config, shutdown: &Shutdown) -> Result<()> {
    info!("Starting");
    let api_resolver = ApiResolver::try_new(kube::Config::infer().await?)?;
    let service_registry = ServiceRegistry::default();

    start_health_probe(config.health_probe_bind_address, &service_registry, shutdown).await?;
    start_metrics(config.metrics_bind_address, shutdown).await?;

    if config.leader_elect {
        let leases = api_resolver.namespaced(api_resolver.default_namespace());
        acquire_and_hold(
            leases,
            LEADER_LEASE_NAME,
            &pod_identity(),
            &service_registry,
            shutdown,
        )
        .await?;
    }

    let stores = start_reflectors(&api_resolver, &config, &service_registry, shutdown)?;
    start_controller(&api_resolver, stores.clone(), &config, &service_registry, shutdown)?;
    start_webhook(
        &api_resolver,
        config.clone(),
        WebhookConfig::from_cert_dir(config.webhook_port, config.cert_dir.clone()),
        stores,
        &service_registry,
        shutdown,
    )
    .await?;

    info!("Services started");
    loop {
        let not_ready = service_registry.get_not_ready_services();
        if not_ready.is_empty() {
            info!("Service ready");
            break;
        }

        select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = shutdown.wait_shutdown_triggered() => {
                break
            },
        }
    }

    Ok(())
}

fn selfish_frame_filter(frames: &mut Vec<&Frame>) {
    frames.retain(|frame| {
        matches!(frame.name.as_ref(),
            Some(name) if name == "pdb_watch_operator"
            || name.starts_with("pdb_watch_operator::"))
    });
}

fn init_tracing_subscriber() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(Level::INFO))
        .from_env()?;

    let fmt = tracing_subscriber::fmt::layer().with_filter(filter);

    tracing_subscriber::registry()
        .with(fmt)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(())
}

fn install_color_eyre() -> Result<()> {
    color_eyre::config::HookBuilder::new()
        .capture_span_trace_by_default(true)
        .add_frame_filter(Box::new(selfish_frame_filter))
        .install()?;
    Ok(())
}

fn print_build_info() {
    info!("tag: {}", env!("VERGEN_GIT_DESCRIBE"));
    debug!("branch: {}", env!("VERGEN_GIT_BRANCH"));
    debug!("commit: {}", env!("VERGEN_GIT_SHA"));
    debug!("commit date: {}", env!("VERGEN_GIT_COMMIT_DATE"));

    debug!("rustc: {}", env!("VERGEN_RUSTC_SEMVER"));
    debug!("build date: {}", env!("VERGEN_BUILD_TIMESTAMP"));
}
