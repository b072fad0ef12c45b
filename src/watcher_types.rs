use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One watcher per protected workload: `spec` is the desired half, mutated
/// by the eviction webhook; `status` is the observed half, mutated by the
/// reconcile controller. The two halves never collide on the same field.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "pdb-watch.io",
    version = "v1",
    kind = "PdbWatcher",
    plural = "pdbwatchers",
    shortname = "pdbw",
    namespaced,
    status = "PdbWatcherStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct PdbWatcherSpec {
    /// Name of the PDB whose saturation this watcher reacts to, same namespace.
    pub pdb_name: String,

    /// Name of the workload to scale. Empty until the controller discovers it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Written by the webhook on every observed eviction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_eviction: Option<EvictionRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PdbWatcherStatus {
    /// The eviction the controller has already acted on. Equality with
    /// `spec.lastEviction` means "no new eviction since last action."
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_eviction: Option<EvictionRecord>,

    /// The replica count the controller intends to restore once the PDB
    /// regains headroom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    /// Workload generation as of the reconcile that captured `minReplicas`.
    /// Zero means uninitialized.
    #[serde(default)]
    pub deployment_generation: i64,

    /// Latest reconcile failure, cleared on the next clean reconcile.
    /// Supplements the event stream for operators without log access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvictionRecord {
    pub pod_name: String,

    /// RFC3339, second resolution.
    pub eviction_time: String,
}

impl EvictionRecord {
    pub fn parsed_eviction_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::parse_from_rfc3339(&self.eviction_time)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}
