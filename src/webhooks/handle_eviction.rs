use chrono::Utc;
use eyre::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::{Eviction, PodDisruptionBudget};
use kube::{Api, ResourceExt};
use kube::api::{Patch, PatchParams};
use kube::core::admission::AdmissionRequest;
use kube::runtime::reflector::ObjectRef;
use serde_json::json;
use tracing::debug;

use crate::consts::EVENT_REASON_EVICTION_RECORDED;
use crate::error_codes::is_404_not_found_error;
use crate::reflector::Stores;
use crate::report::report_for_ref;
use crate::selector::matches_selector;
use crate::utils::get_object_ref_from_name;
use crate::watcher_types::{EvictionRecord, PdbWatcher};
use crate::webhooks::AppState;
use crate::webhooks::handle_common::InterceptResult;

/// Implements the routing algorithm: the pod vanishing, no watcher
/// matching, or a candidate's PDB being momentarily unreadable are all
/// non-fatal and resolve to `Allow` -- only a write failure on the winning
/// watcher is surfaced as an error.
pub fn eviction_handler<'a>(
    state: &'a AppState,
    request: &'a AdmissionRequest<Eviction>,
) -> BoxFuture<'a, Result<InterceptResult>> {
    handle(state, request).boxed()
}

async fn handle(state: &AppState, request: &AdmissionRequest<Eviction>) -> Result<InterceptResult> {
    let Some(ns) = request.namespace.as_deref() else {
        return Ok(InterceptResult::Allow);
    };
    let pod_name = request.name.as_str();

    let pods: Api<Pod> = state.api_resolver.namespaced(ns);
    let pod = match pods.get(pod_name).await {
        Ok(pod) => pod,
        Err(err) if is_404_not_found_error(&err) => {
            debug!(pod_name, "pod vanished before eviction admission, allowing");
            return Ok(InterceptResult::Allow);
        }
        Err(err) => return Err(err.into()),
    };

    let Some(watcher) = find_matching_watcher(&state.stores, ns, &pod) else {
        return Ok(InterceptResult::Allow);
    };

    record_eviction(state, &watcher, pod_name).await?;

    Ok(InterceptResult::Allow)
}

fn find_matching_watcher(stores: &Stores, ns: &str, pod: &Pod) -> Option<PdbWatcher> {
    for watcher in stores.watchers(ns) {
        let pdb_ref: ObjectRef<PodDisruptionBudget> =
            get_object_ref_from_name(&watcher.spec.pdb_name, Some(ns));

        let Some(pdb) = stores.get_pod_disruption_budget(&pdb_ref) else {
            debug!(pdbName = %watcher.spec.pdb_name, "watcher references a PDB not (yet) in the cache, skipping");
            continue;
        };

        let selector = pdb.spec.as_ref().and_then(|spec| spec.selector.as_ref());
        if matches_selector(pod, selector) {
            return Some((*watcher).clone());
        }
    }

    None
}

async fn record_eviction(state: &AppState, watcher: &PdbWatcher, pod_name: &str) -> Result<()> {
    let now = Utc::now();

    if let Some(last) = &watcher.spec.last_eviction {
        let debounced = last
            .parsed_eviction_time()
            .is_some_and(|at| now - at < chrono::Duration::from_std(state.config.eviction_debounce).unwrap_or_default());
        if debounced {
            debug!(pdbName = %watcher.spec.pdb_name, "recent eviction already recorded, skipping write");
            return Ok(());
        }
    }

    let record = EvictionRecord {
        pod_name: pod_name.to_owned(),
        eviction_time: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    };

    let watchers: Api<PdbWatcher> = state.api_resolver.api_for(watcher);
    let patch = Patch::Merge(json!({ "spec": { "lastEviction": record } }));
    watchers
        .patch(&watcher.name_any(), &PatchParams::default(), &patch)
        .await?;

    report_for_ref(
        &state.recorder,
        &ObjectRef::from_obj(watcher),
        "Record",
        EVENT_REASON_EVICTION_RECORDED,
        format!("recorded eviction of pod {pod_name:?}"),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_json;
    use crate::watcher_types::PdbWatcherSpec;

    fn watcher(name: &str, pdb_name: &str) -> PdbWatcher {
        PdbWatcher::new(
            name,
            PdbWatcherSpec {
                pdb_name: pdb_name.to_owned(),
                deployment_name: None,
                last_eviction: None,
            },
        )
    }

    #[test]
    fn watcher_whose_pdb_selects_the_pod_is_found_among_others() {
        let mut a = watcher("watcher-a", "pdb-a");
        a.metadata.namespace = Some("ns".to_owned());
        let mut b = watcher("watcher-b", "pdb-b");
        b.metadata.namespace = Some("ns".to_owned());

        let pdb_a: PodDisruptionBudget = from_json!({
            "metadata": { "name": "pdb-a", "namespace": "ns" },
            "spec": { "selector": { "matchLabels": { "app": "other" } } },
        });
        let pdb_b: PodDisruptionBudget = from_json!({
            "metadata": { "name": "pdb-b", "namespace": "ns" },
            "spec": { "selector": { "matchLabels": { "app": "web" } } },
        });

        let stores = Stores::for_test(vec![a, b], vec![pdb_a, pdb_b], vec![], vec![]);

        let pod: Pod = from_json!({
            "metadata": { "name": "pod-1", "namespace": "ns", "labels": { "app": "web" } },
        });

        let matched = find_matching_watcher(&stores, "ns", &pod);
        assert_eq!(matched.map(|w| w.name_any()), Some("watcher-b".to_owned()));
    }

    #[test]
    fn no_watcher_matches_is_none() {
        let mut a = watcher("watcher-a", "pdb-a");
        a.metadata.namespace = Some("ns".to_owned());
        let pdb_a: PodDisruptionBudget = from_json!({
            "metadata": { "name": "pdb-a", "namespace": "ns" },
            "spec": { "selector": { "matchLabels": { "app": "other" } } },
        });
        let stores = Stores::for_test(vec![a], vec![pdb_a], vec![], vec![]);

        let pod: Pod = from_json!({
            "metadata": { "name": "pod-1", "namespace": "ns", "labels": { "app": "web" } },
        });

        assert!(find_matching_watcher(&stores, "ns", &pod).is_none());
    }

    #[test]
    fn watcher_referencing_uncached_pdb_is_skipped() {
        let mut a = watcher("watcher-a", "missing-pdb");
        a.metadata.namespace = Some("ns".to_owned());
        let stores = Stores::for_test(vec![a], vec![], vec![], vec![]);

        let pod: Pod = from_json!({
            "metadata": { "name": "pod-1", "namespace": "ns", "labels": { "app": "web" } },
        });

        assert!(find_matching_watcher(&stores, "ns", &pod).is_none());
    }
}
