mod api_resolver;
mod config;
mod consts;
mod controller;
mod error_codes;
mod leader_election;
mod probe;
mod reflector;
mod report;
mod selector;
mod service_registry;
mod shutdown;
mod spawn_service;
mod surge;
mod utils;
pub mod webhooks;
mod watcher_types;
mod workload_discovery;

pub use crate::api_resolver::ApiResolver;
pub use crate::config::Config;
pub use crate::controller::start_controller;
pub use crate::leader_election::{acquire_and_hold, pod_identity};
pub use crate::probe::{start_health_probe, start_metrics};
pub use crate::reflector::{Stores, start_reflectors};
pub use crate::service_registry::ServiceRegistry;
pub use crate::shutdown::Shutdown;
pub use crate::watcher_types::{EvictionRecord, PdbWatcher, PdbWatcherSpec, PdbWatcherStatus};
pub use crate::webhooks::{WebhookConfig, start_webhook};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
