use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use eyre::{Result, eyre};
use humantime::parse_duration;

/// The horizon named in the design notes: an eviction older than this is no
/// longer "recent" and will not trigger a surge.
const DEFAULT_RECENT_EVICTION_WINDOW: &str = "5min";

#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct Config {
    /// Port the eviction admission webhook listens on.
    #[arg(long, default_value = "9443")]
    pub webhook_port: u16,

    /// Directory containing tls.crt/tls.key for the webhook server.
    #[arg(long, default_value = "/var/run/secrets/webhook-cert")]
    pub cert_dir: String,

    /// Bind address for the `/metrics` endpoint.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// Bind address for the `/healthz` liveness/readiness endpoint.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Enable leader election so only one replica of the controller reconciles at a time.
    #[arg(long, default_value = "false")]
    pub leader_elect: bool,

    /// Number of watchers reconciled concurrently. Kept at 1 by default (see
    /// the concurrency model notes): higher values are safe because the work
    /// queue deduplicates by key.
    #[arg(long, default_value = "1")]
    pub concurrency: u16,

    /// How long after an eviction is recorded the controller still considers it
    /// "recent" enough to justify a surge.
    #[arg(long, default_value = DEFAULT_RECENT_EVICTION_WINDOW, value_parser = parse_recent_eviction_window)]
    pub recent_eviction_window: Duration,

    /// Skip a webhook write if the watcher's last recorded eviction is within
    /// this window, to avoid write storms during a mass drain.
    #[arg(long, default_value = "60s", value_parser = parse_duration_arg)]
    pub eviction_debounce: Duration,
}

fn parse_recent_eviction_window(input: &str) -> Result<Duration> {
    let duration = parse_duration(input)?;
    if duration.is_zero() {
        return Err(eyre!("recent-eviction-window must be greater than zero"));
    }

    Ok(duration)
}

fn parse_duration_arg(input: &str) -> Result<Duration> {
    Ok(parse_duration(input)?)
}
