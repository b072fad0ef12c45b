use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::ResourceExt;
use thiserror::Error;

/// Pure read-only: given the pods already matched against a PDB's selector
/// and the ReplicaSets in the same namespace, walks Pod -> ReplicaSet ->
/// Deployment owner references and returns the single Deployment name they
/// resolve to. This is the only place in the crate that walks owner chains.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no deployment owns any pod selected by the PDB")]
    NotFound,

    #[error("PDB's selected pods resolve to multiple deployments: {0:?}")]
    MultipleDeployments(Vec<String>),
}

pub fn discover_deployment_name(
    selected_pods: &[Arc<Pod>],
    replica_sets: &[Arc<ReplicaSet>],
) -> Result<String, DiscoveryError> {
    let mut deployment_names = BTreeSet::new();

    for pod in selected_pods {
        let Some(replica_set_name) = owner_name(pod.as_ref(), "ReplicaSet") else {
            continue;
        };

        let Some(replica_set) = replica_sets
            .iter()
            .find(|rs| rs.name_any() == replica_set_name)
        else {
            continue;
        };

        if let Some(deployment_name) = owner_name(replica_set.as_ref(), "Deployment") {
            deployment_names.insert(deployment_name);
        }
    }

    match deployment_names.len() {
        0 => Err(DiscoveryError::NotFound),
        1 => Ok(deployment_names.into_iter().next().expect("len checked")),
        _ => Err(DiscoveryError::MultipleDeployments(
            deployment_names.into_iter().collect(),
        )),
    }
}

fn owner_name(res: &impl kube::Resource, kind: &str) -> Option<String> {
    res.owner_references()
        .iter()
        .find(|owner| owner.kind == kind)
        .map(|owner| owner.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! from_json {
        ($ty:ty, $json:tt) => {
            serde_json::from_value::<$ty>(serde_json::json!($json)).expect("fixture parses")
        };
    }

    fn owned_pod(name: &str, owner_kind: &str, owner_name: &str) -> Arc<Pod> {
        Arc::new(from_json!(Pod, {
            "metadata": {
                "name": name,
                "namespace": "default",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": owner_kind,
                    "name": owner_name,
                    "uid": "00000000-0000-0000-0000-000000000000",
                    "controller": true,
                }],
            },
        }))
    }

    fn owned_replica_set(name: &str, owner_name: &str) -> Arc<ReplicaSet> {
        Arc::new(from_json!(ReplicaSet, {
            "metadata": {
                "name": name,
                "namespace": "default",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": owner_name,
                    "uid": "11111111-1111-1111-1111-111111111111",
                    "controller": true,
                }],
            },
        }))
    }

    #[test]
    fn resolves_single_deployment_through_owner_chain() {
        let pods = vec![owned_pod("pod-a", "ReplicaSet", "rs-a")];
        let replica_sets = vec![owned_replica_set("rs-a", "my-deployment")];

        assert_eq!(
            discover_deployment_name(&pods, &replica_sets),
            Ok("my-deployment".to_owned())
        );
    }

    #[test]
    fn no_owning_deployment_is_not_found() {
        let pods = vec![owned_pod("pod-a", "ReplicaSet", "rs-a")];

        assert_eq!(
            discover_deployment_name(&pods, &[]),
            Err(DiscoveryError::NotFound)
        );
    }

    #[test]
    fn pods_owned_by_distinct_deployments_refuse() {
        let pods = vec![
            owned_pod("pod-a", "ReplicaSet", "rs-a"),
            owned_pod("pod-b", "ReplicaSet", "rs-b"),
        ];
        let replica_sets = vec![
            owned_replica_set("rs-a", "deployment-a"),
            owned_replica_set("rs-b", "deployment-b"),
        ];

        assert_eq!(
            discover_deployment_name(&pods, &replica_sets),
            Err(DiscoveryError::MultipleDeployments(vec![
                "deployment-a".to_owned(),
                "deployment-b".to_owned(),
            ]))
        );
    }
}
