use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, trigger_self};
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::runtime::{Controller, WatchStreamExt, controller, predicates, watcher};
use kube::{Api, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::{Level, debug, error, info, span, trace};

use crate::api_resolver::ApiResolver;
use crate::consts::{
    CONTROLLER_NAME, EVENT_REASON_BASELINE_ADOPTED, EVENT_REASON_CONFLICT,
    EVENT_REASON_MULTIPLE_DEPLOYMENTS, EVENT_REASON_REVERTED, EVENT_REASON_SURGED,
};
use crate::error_codes::{
    is_404_not_found_error, is_409_conflict_error, is_410_expired_error, is_transient_error,
};
use crate::instrumented;
use crate::reflector::Stores;
use crate::report::{report_for_ref, warn_report_for_ref};
use crate::selector::matches_selector;
use crate::service_registry::ServiceRegistry;
use crate::shutdown::Shutdown;
use crate::spawn_service::spawn_service;
use crate::surge::{compute_max_surge, is_recent_eviction};
use crate::watcher_types::{EvictionRecord, PdbWatcher};
use crate::workload_discovery::{DiscoveryError, discover_deployment_name};
use crate::Config as AppConfig;

const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_TRANSIENT_ERROR_RECONCILE: Duration = Duration::from_secs(5);
const REFUSE_RETRY: Duration = Duration::from_secs(30);
const IMMEDIATE_REQUEUE: Duration = Duration::from_secs(0);

/// Start the level-triggered controller that drives `PdbWatcher` reconciles.
pub fn start_controller(
    api_resolver: &ApiResolver,
    stores: Stores,
    config: &AppConfig,
    service_registry: &ServiceRegistry,
    shutdown: &Shutdown,
) -> Result<()> {
    let api_resolver = api_resolver.clone();
    let recorder = Recorder::new(
        api_resolver.client.clone(),
        Reporter {
            controller: String::from(CONTROLLER_NAME),
            instance: None,
        },
    );

    let context = Arc::new(ReconcilerContext {
        api_resolver: api_resolver.clone(),
        stores,
        config: config.clone(),
        recorder,
    });

    let watchers: Api<PdbWatcher> = api_resolver.all();

    // The watch stream includes every status-subresource write this
    // reconciler itself makes (`adopt_baseline`, `mirror_surge`,
    // `mirror_revert`, `record_last_error`); without a generation predicate
    // each of those would re-trigger a fresh reconcile.
    let (store_reader, store_writer) = kube::runtime::reflector::store();
    let trigger = trigger_self(
        kube::runtime::reflector(store_writer, watcher(watchers, Config::default()))
            .applied_objects()
            .predicate_filter(predicates::generation),
        Default::default(),
    );

    let controller = Controller::for_stream(trigger, store_reader)
        .with_config(controller::Config::default().concurrency(config.concurrency.into()))
        .graceful_shutdown_on(shutdown.wait_shutdown_triggered());

    let signal = service_registry.register("controller");
    spawn_service(shutdown, "controller", {
        let shutdown = shutdown.clone();
        async move {
            signal.ready();
            controller
                .run(reconcile, error_policy, context)
                .take_until(shutdown.wait_shutdown_triggered())
                .for_each(log_reconcile_result)
                .await
        }
    })?;

    Ok(())
}

struct ReconcilerContext {
    api_resolver: ApiResolver,
    stores: Stores,
    config: AppConfig,
    recorder: Recorder,
}

#[derive(Error, Debug)]
enum ReconcileError {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("watcher is missing a namespace")]
    MissingNamespace,

    #[error("another watcher already references pdbName {pdb_name:?}")]
    Conflict { pdb_name: String },

    #[error("pdb {0:?} not found")]
    PdbNotFound(String),

    #[error("no deployment owns any pod selected by pdb {0:?}")]
    NoDeployment(String),

    #[error("pdb {pdb_name:?} selects pods owned by multiple deployments: {deployments:?}")]
    MultipleDeployments {
        pdb_name: String,
        deployments: Vec<String>,
    },
}

async fn reconcile(
    watcher: Arc<PdbWatcher>,
    context: Arc<ReconcilerContext>,
) -> Result<Action, ReconcileError> {
    let span = span!(Level::ERROR, "reconciler");
    instrumented!(span, async move {
        let result = run_reconcile(&watcher, &context).await;
        record_last_error(&context, &watcher, &result).await;
        result
    })
}

async fn run_reconcile(
    watcher: &PdbWatcher,
    context: &ReconcilerContext,
) -> Result<Action, ReconcileError> {
    let ns = watcher.namespace().ok_or(ReconcileError::MissingNamespace)?;

    // Step 2: conflict check.
    let has_conflict = context.stores.watchers(&ns).iter().any(|sibling| {
        sibling.name_any() != watcher.name_any() && sibling.spec.pdb_name == watcher.spec.pdb_name
    });
    if has_conflict {
        warn_report_for_ref(
            &context.recorder,
            &ObjectRef::from_obj(watcher),
            "Refuse",
            EVENT_REASON_CONFLICT,
            format!("another watcher already references pdbName {:?}", watcher.spec.pdb_name),
        )
        .await;
        return Err(ReconcileError::Conflict {
            pdb_name: watcher.spec.pdb_name.clone(),
        });
    }

    // Step 3: resolve workload.
    let pdb_ref: ObjectRef<PodDisruptionBudget> =
        ObjectRef::new(&watcher.spec.pdb_name).within(&ns);
    let pdb = context
        .stores
        .get_pod_disruption_budget(&pdb_ref)
        .ok_or_else(|| ReconcileError::PdbNotFound(watcher.spec.pdb_name.clone()))?;

    let deployment_name = match watcher.spec.deployment_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => {
            let selector = pdb.spec.as_ref().and_then(|spec| spec.selector.as_ref());
            let selected_pods: Vec<_> = context
                .stores
                .pods(&ns)
                .into_iter()
                .filter(|pod| matches_selector(pod.as_ref(), selector))
                .collect();
            let replica_sets = context.stores.replica_sets(&ns);

            match discover_deployment_name(&selected_pods, &replica_sets) {
                Ok(name) => {
                    persist_deployment_name(context, watcher, &name).await?;
                    return Ok(Action::requeue(IMMEDIATE_REQUEUE));
                }
                Err(DiscoveryError::NotFound) => {
                    return Err(ReconcileError::NoDeployment(watcher.spec.pdb_name.clone()));
                }
                Err(DiscoveryError::MultipleDeployments(deployments)) => {
                    warn_report_for_ref(
                        &context.recorder,
                        &ObjectRef::from_obj(watcher),
                        "Refuse",
                        EVENT_REASON_MULTIPLE_DEPLOYMENTS,
                        format!("pdb selects pods owned by multiple deployments: {deployments:?}"),
                    )
                    .await;
                    return Err(ReconcileError::MultipleDeployments {
                        pdb_name: watcher.spec.pdb_name.clone(),
                        deployments,
                    });
                }
            }
        }
    };

    let deployments: Api<Deployment> = context.api_resolver.namespaced(&ns);
    let deployment = match deployments.get(&deployment_name).await {
        Ok(deployment) => deployment,
        Err(err) if is_404_not_found_error(&err) => {
            clear_deployment_name(context, watcher).await?;
            return Ok(Action::requeue(IMMEDIATE_REQUEUE));
        }
        Err(err) => return Err(err.into()),
    };

    // Step 4: generation-cursor arbitration.
    let current_generation = deployment.metadata.generation.unwrap_or(0);
    let observed_generation = watcher
        .status
        .as_ref()
        .map(|status| status.deployment_generation)
        .unwrap_or(0);
    let current_replicas = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(0);

    if observed_generation == 0 || observed_generation != current_generation {
        adopt_baseline(context, watcher, current_replicas, current_generation).await?;
        return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
    }

    // Step 5: decision.
    let baseline = watcher
        .status
        .as_ref()
        .and_then(|status| status.min_replicas)
        .unwrap_or(current_replicas);
    let disruptions_allowed = pdb
        .status
        .as_ref()
        .and_then(|status| status.disruptions_allowed)
        .unwrap_or(0);

    let desired_eviction = watcher.spec.last_eviction.as_ref();
    let observed_eviction = watcher.status.as_ref().and_then(|s| s.last_eviction.as_ref());

    if disruptions_allowed == 0
        && is_recent_eviction(
            desired_eviction,
            observed_eviction,
            chrono::Duration::from_std(context.config.recent_eviction_window)
                .unwrap_or(chrono::Duration::minutes(5)),
            Utc::now(),
        )
    {
        let surged = baseline + compute_max_surge(&deployment, baseline);
        let new_generation = patch_replicas(context, &ns, &deployment_name, surged).await?;
        mirror_surge(context, watcher, new_generation, desired_eviction.cloned()).await?;
        report_for_ref(
            &context.recorder,
            &ObjectRef::from_obj(watcher),
            "Surge",
            EVENT_REASON_SURGED,
            format!("surged {deployment_name} from {baseline} to {surged} replicas"),
        )
        .await;
    } else if disruptions_allowed > 0 && current_replicas != baseline {
        let new_generation = patch_replicas(context, &ns, &deployment_name, baseline).await?;
        mirror_revert(context, watcher, new_generation).await?;
        report_for_ref(
            &context.recorder,
            &ObjectRef::from_obj(watcher),
            "Revert",
            EVENT_REASON_REVERTED,
            format!("reverted {deployment_name} to baseline {baseline} replicas"),
        )
        .await;
    }

    Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
}

async fn record_last_error(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
    result: &Result<Action, ReconcileError>,
) {
    let previous = watcher.status.as_ref().and_then(|s| s.last_error.clone());
    let next = match result {
        Ok(_) => None,
        Err(err) => Some(err.to_string()),
    };

    if previous == next {
        return;
    }

    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = json!({ "status": { "lastError": next } });
    if let Err(err) = watchers
        .patch_status(
            &watcher.name_any(),
            &PatchParams::default(),
            serde_json::to_vec(&patch).expect("status patch always serializes"),
        )
        .await
    {
        error!(?err, "failed to record lastError on watcher status");
    }
}

async fn persist_deployment_name(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
    name: &str,
) -> Result<(), ReconcileError> {
    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = Patch::Merge(json!({ "spec": { "deploymentName": name } }));
    watchers
        .patch(&watcher.name_any(), &PatchParams::default(), &patch)
        .await?;

    report_for_ref(
        &context.recorder,
        &ObjectRef::from_obj(watcher),
        "Discover",
        crate::consts::EVENT_REASON_DISCOVERED_DEPLOYMENT,
        format!("discovered deployment {name:?} via PDB selector"),
    )
    .await;

    Ok(())
}

async fn clear_deployment_name(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
) -> Result<(), ReconcileError> {
    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = Patch::Merge(json!({ "spec": { "deploymentName": null } }));
    watchers
        .patch(&watcher.name_any(), &PatchParams::default(), &patch)
        .await?;
    Ok(())
}

async fn adopt_baseline(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
    replicas: i32,
    generation: i64,
) -> Result<(), ReconcileError> {
    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = json!({
        "status": {
            "minReplicas": replicas,
            "deploymentGeneration": generation,
        }
    });
    watchers
        .patch_status(
            &watcher.name_any(),
            &PatchParams::default(),
            serde_json::to_vec(&patch).expect("status patch always serializes"),
        )
        .await?;

    debug!(replicas, generation, "adopted new baseline");
    report_for_ref(
        &context.recorder,
        &ObjectRef::from_obj(watcher),
        "Adopt",
        EVENT_REASON_BASELINE_ADOPTED,
        format!("adopted baseline of {replicas} replicas at generation {generation}"),
    )
    .await;

    Ok(())
}

async fn patch_replicas(
    context: &ReconcilerContext,
    ns: &str,
    deployment_name: &str,
    replicas: i32,
) -> Result<i64, ReconcileError> {
    let deployments: Api<Deployment> = context.api_resolver.namespaced(ns);
    let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));
    let updated = deployments
        .patch(deployment_name, &PatchParams::default(), &patch)
        .await?;

    Ok(updated.metadata.generation.unwrap_or(0))
}

async fn mirror_surge(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
    new_generation: i64,
    last_eviction: Option<EvictionRecord>,
) -> Result<(), ReconcileError> {
    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = json!({
        "status": {
            "deploymentGeneration": new_generation,
            "lastEviction": last_eviction,
        }
    });
    watchers
        .patch_status(
            &watcher.name_any(),
            &PatchParams::default(),
            serde_json::to_vec(&patch).expect("status patch always serializes"),
        )
        .await?;
    Ok(())
}

async fn mirror_revert(
    context: &ReconcilerContext,
    watcher: &PdbWatcher,
    new_generation: i64,
) -> Result<(), ReconcileError> {
    let watchers: Api<PdbWatcher> = context.api_resolver.api_for(watcher);
    let patch = json!({ "status": { "deploymentGeneration": new_generation } });
    watchers
        .patch_status(
            &watcher.name_any(),
            &PatchParams::default(),
            serde_json::to_vec(&patch).expect("status patch always serializes"),
        )
        .await?;
    Ok(())
}

fn error_policy(
    watcher: Arc<PdbWatcher>,
    err: &ReconcileError,
    context: Arc<ReconcilerContext>,
) -> Action {
    let span = span!(Level::ERROR, "reconciler::error_policy");
    let _ = span.enter();
    let _ = context;

    match err {
        ReconcileError::KubeError(err) if is_409_conflict_error(err) => {
            Action::requeue(Duration::from_secs(1))
        }
        ReconcileError::KubeError(err) if is_transient_error(err) => {
            let object_ref = ObjectRef::from_obj(watcher.as_ref());
            info!(%object_ref, ?err, "retry transient error");
            Action::requeue(DEFAULT_TRANSIENT_ERROR_RECONCILE)
        }
        ReconcileError::Conflict { .. }
        | ReconcileError::MultipleDeployments { .. }
        | ReconcileError::NoDeployment(_) => Action::requeue(REFUSE_RETRY),
        _ => Action::requeue(DEFAULT_TRANSIENT_ERROR_RECONCILE),
    }
}

async fn log_reconcile_result(
    result: Result<(ObjectRef<PdbWatcher>, Action), controller::Error<ReconcileError, watcher::Error>>,
) {
    let span = span!(Level::ERROR, "reconciler");
    instrumented!(span, async move {
        match result {
            Ok((object_ref, action)) => {
                trace!(%object_ref, ?action, "success");
            }
            Err(controller::Error::ReconcilerFailed(err, object_ref)) => match err {
                ReconcileError::KubeError(err) if is_409_conflict_error(&err) => {
                    debug!(%object_ref, ?err, "conflict");
                }
                ReconcileError::KubeError(err)
                    if is_404_not_found_error(&err) || is_410_expired_error(&err) =>
                {
                    debug!(%object_ref, ?err, "gone");
                }
                _ => error!(%object_ref, ?err, "error"),
            },
            Err(controller::Error::ObjectNotFound(object_ref)) => {
                debug!(%object_ref, "gone");
            }
            Err(err) => {
                error!(?err, "error");
            }
        }
    })
}
