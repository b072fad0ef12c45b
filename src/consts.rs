pub const CONTROLLER_NAME: &str = "pdb-watch-operator";

pub const EVICTION_WEBHOOK_PATH: &str = "/validate-eviction";

pub const EVENT_REASON_CONFLICT: &str = "Conflict";
pub const EVENT_REASON_MULTIPLE_DEPLOYMENTS: &str = "MultipleDeployments";
pub const EVENT_REASON_SURGED: &str = "Surged";
pub const EVENT_REASON_REVERTED: &str = "Reverted";
pub const EVENT_REASON_BASELINE_ADOPTED: &str = "BaselineAdopted";
pub const EVENT_REASON_DISCOVERED_DEPLOYMENT: &str = "DiscoveredDeployment";
pub const EVENT_REASON_EVICTION_RECORDED: &str = "EvictionRecorded";
