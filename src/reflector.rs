use std::default::Default;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use eyre::Result;
use futures::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store, store};
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::{debug, error, trace};

use crate::api_resolver::ApiResolver;
use crate::error_codes::is_410_expired_error_response;
use crate::service_registry::ServiceSignal;
use crate::shutdown::Shutdown;
use crate::spawn_service::spawn_service;
use crate::watcher_types::PdbWatcher;
use crate::{Config, ServiceRegistry};

/// Read-side caches for everything the reconcile loop and the webhook need
/// but never write to directly: the PDB itself (for its selector and
/// `status.disruptionsAllowed`), Pods and ReplicaSets (for owner-chain
/// discovery), and sibling watchers (for the duplicate-`pdbName` check).
///
/// Deployments are deliberately not reflected here: the controller fetches
/// them live immediately before a write, since the generation cursor in
/// step 4 needs the freshest possible value.
#[derive(Clone)]
pub struct Stores {
    inner: Arc<StoresInner>,
}

struct StoresInner {
    watchers: Store<PdbWatcher>,
    pdbs: Store<PodDisruptionBudget>,
    pods: Store<Pod>,
    replica_sets: Store<ReplicaSet>,
}

impl Stores {
    fn new(
        watchers: Store<PdbWatcher>,
        pdbs: Store<PodDisruptionBudget>,
        pods: Store<Pod>,
        replica_sets: Store<ReplicaSet>,
    ) -> Self {
        Self {
            inner: Arc::new(StoresInner {
                watchers,
                pdbs,
                pods,
                replica_sets,
            }),
        }
    }

    pub fn watchers(&self, ns: &str) -> Vec<Arc<PdbWatcher>> {
        self.inner
            .watchers
            .state()
            .into_iter()
            .filter(|x| x.metadata.namespace.as_deref() == Some(ns))
            .collect()
    }

    pub fn get_watcher(&self, key: &ObjectRef<PdbWatcher>) -> Option<Arc<PdbWatcher>> {
        self.inner.watchers.get(key)
    }

    pub fn get_pod_disruption_budget(
        &self,
        key: &ObjectRef<PodDisruptionBudget>,
    ) -> Option<Arc<PodDisruptionBudget>> {
        self.inner.pdbs.get(key)
    }

    pub fn pods(&self, ns: &str) -> Vec<Arc<Pod>> {
        self.inner
            .pods
            .state()
            .into_iter()
            .filter(|x| x.metadata.namespace.as_deref() == Some(ns))
            .collect()
    }

    pub fn replica_sets(&self, ns: &str) -> Vec<Arc<ReplicaSet>> {
        self.inner
            .replica_sets
            .state()
            .into_iter()
            .filter(|x| x.metadata.namespace.as_deref() == Some(ns))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        watchers: Vec<PdbWatcher>,
        pdbs: Vec<PodDisruptionBudget>,
        pods: Vec<Pod>,
        replica_sets: Vec<ReplicaSet>,
    ) -> Self {
        Self::new(
            store_from(watchers),
            store_from(pdbs),
            store_from(pods),
            store_from(replica_sets),
        )
    }
}

#[cfg(test)]
pub(crate) fn store_from<K>(iter: impl IntoIterator<Item = K>) -> Store<K>
where
    K: 'static + kube::Resource + Clone,
    K::DynamicType: Hash + Eq + Clone + Default,
{
    let (reader, mut writer) = store();
    writer.apply_watcher_event(&Event::Init);
    for item in iter.into_iter() {
        writer.apply_watcher_event(&Event::InitApply(item));
    }
    writer.apply_watcher_event(&Event::InitDone);
    reader
}

pub fn start_reflectors(
    api_resolver: &ApiResolver,
    _config: &Config,
    service_registry: &ServiceRegistry,
    shutdown: &Shutdown,
) -> Result<Stores> {
    let (watcher_reader, watcher_writer) = store();
    spawn_service(shutdown, "reflector:PdbWatcher", {
        let api: Api<PdbWatcher> = api_resolver.all();
        let stream = watcher(api, Default::default());
        let signal = service_registry.register("reflector:PdbWatcher");
        run_reflector(shutdown, watcher_writer, stream, signal)
    })?;

    let (pdb_reader, pdb_writer) = store();
    spawn_service(shutdown, "reflector:PodDisruptionBudget", {
        let api: Api<PodDisruptionBudget> = api_resolver.all();
        let stream = watcher(api, Default::default()).map_ok(|ev| {
            ev.modify(|pdb| {
                pdb.metadata.annotations = None;
                pdb.metadata.managed_fields = None;
            })
        });
        let signal = service_registry.register("reflector:PodDisruptionBudget");
        run_reflector(shutdown, pdb_writer, stream, signal)
    })?;

    let (pod_reader, pod_writer) = store();
    spawn_service(shutdown, "reflector:Pod", {
        let api: Api<Pod> = api_resolver.all();
        let stream = watcher(api, Default::default()).map_ok(|event| {
            event.modify(|pod| {
                pod.metadata.annotations = None;
                pod.metadata.managed_fields = None;
                pod.spec = None;
                pod.status = None;
            })
        });
        let signal = service_registry.register("reflector:Pod");
        run_reflector(shutdown, pod_writer, stream, signal)
    })?;

    let (replica_set_reader, replica_set_writer) = store();
    spawn_service(shutdown, "reflector:ReplicaSet", {
        let api: Api<ReplicaSet> = api_resolver.all();
        let stream = watcher(api, Default::default()).map_ok(|ev| {
            ev.modify(|replica_set| {
                replica_set.metadata.annotations = None;
                replica_set.metadata.managed_fields = None;
                replica_set.spec = None;
                replica_set.status = None;
            })
        });
        let signal = service_registry.register("reflector:ReplicaSet");
        run_reflector(shutdown, replica_set_writer, stream, signal)
    })?;

    Ok(Stores::new(
        watcher_reader,
        pdb_reader,
        pod_reader,
        replica_set_reader,
    ))
}

fn run_reflector<K>(
    shutdown: &Shutdown,
    writer: Writer<K>,
    stream: impl Stream<Item = watcher::Result<Event<K>>> + 'static,
    signal: ServiceSignal,
) -> impl Future<Output = ()> + 'static
where
    K: kube::Resource + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let shutdown = shutdown.clone();
    async move {
        let stream = stream
            .default_backoff()
            .take_until(shutdown.wait_shutdown_triggered());

        let mut results = Box::pin(kube::runtime::reflector(writer, stream));

        while let Some(result) = results.next().await {
            log(&result, true);

            if let Ok(Event::InitDone) = result {
                signal.ready();
                break;
            }
        }

        while let Some(result) = results.next().await {
            log(&result, false);
        }

        fn log<K>(result: &watcher::Result<Event<K>>, init: bool)
        where
            K: kube::Resource,
            K::DynamicType: Default,
        {
            match result {
                Ok(event) => match event {
                    Event::Apply(resource) => {
                        let object_ref = ObjectRef::from_obj(resource);
                        trace!(%object_ref, "resource applied");
                    }
                    Event::Delete(resource) => {
                        let object_ref = ObjectRef::from_obj(resource);
                        trace!(%object_ref, "resource deleted");
                    }
                    Event::Init => {
                        trace!("stream restart");
                    }
                    Event::InitApply(resource) => {
                        let object_ref = ObjectRef::from_obj(resource);
                        trace!(%object_ref, "stream restarting");
                    }
                    Event::InitDone => {
                        trace!("stream restart done");
                    }
                },
                Err(watcher::Error::WatchFailed(err)) if !init => {
                    debug!(?err, "watch failed. stream will restart soon");
                }
                Err(watcher::Error::WatchError(resp))
                    if !init && is_410_expired_error_response(resp) =>
                {
                    debug!(?resp, "watch error. stream will restart");
                }
                Err(err) => {
                    error!(?err, "reflector error");
                }
            }
        }
    }
}
