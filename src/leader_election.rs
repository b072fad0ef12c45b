use std::time::Duration;

use chrono::Utc;
use eyre::Result;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Patch, PatchParams, PostParams};
use kube::Api;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error_codes::{is_404_not_found_error, is_409_conflict_error};
use crate::service_registry::ServiceRegistry;
use crate::shutdown::Shutdown;
use crate::spawn_service::spawn_service;

const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks until this replica holds `lease_name` (stealing it once its
/// `leaseDurationSeconds` has elapsed since the last renew), then spawns a
/// task that keeps renewing it for as long as the process runs. Losing the
/// lease mid-run triggers shutdown — this crate's answer to "stop being
/// leader" is "let Kubernetes restart the process and rerun the election,"
/// not graceful demotion, matching the manager convention SPEC_FULL §A.2
/// models `leader_elect` on.
pub async fn acquire_and_hold(
    leases: Api<Lease>,
    lease_name: &str,
    identity: &str,
    service_registry: &ServiceRegistry,
    shutdown: &Shutdown,
) -> Result<()> {
    let signal = service_registry.register("leader-election");

    loop {
        if claim(&leases, lease_name, identity).await? {
            break;
        }

        debug!(lease_name, identity, "leader lease held by another replica");
        tokio::select! {
            _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            _ = shutdown.wait_shutdown_triggered() => return Ok(()),
        }
    }

    info!(identity, lease_name, "acquired leader lease");
    signal.ready();

    let lease_name = lease_name.to_owned();
    let identity = identity.to_owned();
    spawn_service(shutdown, "leader-election", {
        let shutdown = shutdown.clone();
        async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(RENEW_INTERVAL) => {}
                    _ = shutdown.wait_shutdown_triggered() => return,
                }

                match renew(&leases, &lease_name, &identity).await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(lease_name, identity, "lost leader lease, triggering shutdown");
                        shutdown.trigger_shutdown();
                        return;
                    }
                    Err(err) => warn!(?err, lease_name, "failed to renew leader lease"),
                }
            }
        }
    })?;

    Ok(())
}

/// `identity` used as the Lease's `holderIdentity`: the pod's own hostname
/// where available (set on every pod via `HOSTNAME`), falling back to a
/// pid-qualified name for out-of-cluster runs.
pub fn pod_identity() -> String {
    match std::env::var("HOSTNAME") {
        Ok(hostname) if !hostname.is_empty() => hostname,
        _ => format!("pdb-watch-operator-{}", std::process::id()),
    }
}

async fn claim(leases: &Api<Lease>, lease_name: &str, identity: &str) -> Result<bool> {
    let now = Utc::now();
    match leases.get(lease_name).await {
        Ok(existing) => {
            let spec = existing.spec.unwrap_or_default();
            if spec.holder_identity.as_deref() == Some(identity) {
                return renew(leases, lease_name, identity).await;
            }

            if !is_expired(&spec, now) {
                return Ok(false);
            }

            let patch = Patch::Merge(json!({
                "spec": {
                    "holderIdentity": identity,
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseTransitions": spec.lease_transitions.unwrap_or(0) + 1,
                }
            }));
            leases.patch(lease_name, &PatchParams::default(), &patch).await?;
            Ok(true)
        }
        Err(err) if is_404_not_found_error(&err) => {
            let lease = Lease {
                metadata: kube::api::ObjectMeta {
                    name: Some(lease_name.to_owned()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(identity.to_owned()),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };

            match leases.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(err) if is_409_conflict_error(&err) => Ok(false),
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

async fn renew(leases: &Api<Lease>, lease_name: &str, identity: &str) -> Result<bool> {
    let existing = leases.get(lease_name).await?;
    if existing.spec.and_then(|spec| spec.holder_identity) != Some(identity.to_owned()) {
        return Ok(false);
    }

    let patch = Patch::Merge(json!({ "spec": { "renewTime": MicroTime(Utc::now()) } }));
    leases.patch(lease_name, &PatchParams::default(), &patch).await?;
    Ok(true)
}

fn is_expired(spec: &LeaseSpec, now: chrono::DateTime<Utc>) -> bool {
    let Some(MicroTime(renew_time)) = spec.renew_time else {
        return true;
    };
    let duration = spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECS);
    now - renew_time > chrono::Duration::seconds(i64::from(duration))
}
