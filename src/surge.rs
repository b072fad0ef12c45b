use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::warn;

use crate::watcher_types::EvictionRecord;

pub const DEFAULT_MAX_SURGE: i32 = 1;

/// Derives the per-surge quantum from the workload's rolling-update
/// strategy. Absent or non-RollingUpdate strategies, and malformed
/// percentages, all degrade to `DEFAULT_MAX_SURGE`.
pub fn compute_max_surge(deployment: &Deployment, baseline: i32) -> i32 {
    let Some(strategy) = deployment.spec.as_ref().and_then(|spec| spec.strategy.as_ref()) else {
        return DEFAULT_MAX_SURGE;
    };

    let Some(rolling_update) = strategy.rolling_update.as_ref() else {
        return DEFAULT_MAX_SURGE;
    };

    let Some(max_surge) = rolling_update.max_surge.as_ref() else {
        return DEFAULT_MAX_SURGE;
    };

    match max_surge {
        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(value) => *value,
        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(value) => {
            match parse_percentage(value) {
                Some(pct) => {
                    let surge = (f64::from(baseline) * pct / 100.0).ceil();
                    surge as i32
                }
                None => {
                    warn!(maxSurge = %value, "malformed MaxSurge percentage, defaulting to 1");
                    DEFAULT_MAX_SURGE
                }
            }
        }
    }
}

fn parse_percentage(value: &str) -> Option<f64> {
    let trimmed = value.strip_suffix('%')?;
    let pct: f64 = trimmed.trim().parse().ok()?;
    if pct.is_sign_negative() {
        return None;
    }
    Some(pct)
}

/// "Recent eviction" per the design: desired and observed differ, the
/// recorded time parses, and it is within `window` of `now`.
pub fn is_recent_eviction(
    desired: Option<&EvictionRecord>,
    observed: Option<&EvictionRecord>,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };

    if Some(desired) == observed {
        return false;
    }

    let Some(evicted_at) = desired.parsed_eviction_time() else {
        warn!(evictionTime = %desired.eviction_time, "malformed eviction time, treating as not recent");
        return false;
    };

    now - evicted_at < window
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn deployment_with_max_surge(max_surge: Option<IntOrString>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                strategy: Some(DeploymentStrategy {
                    rolling_update: Some(RollingUpdateDeployment {
                        max_surge,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_one_when_strategy_absent() {
        let deployment = Deployment::default();
        assert_eq!(compute_max_surge(&deployment, 4), 1);
    }

    #[test]
    fn uses_literal_integer_verbatim() {
        let deployment = deployment_with_max_surge(Some(IntOrString::Int(3)));
        assert_eq!(compute_max_surge(&deployment, 4), 3);
    }

    #[test]
    fn percentage_of_baseline_rounds_up() {
        let deployment = deployment_with_max_surge(Some(IntOrString::String("50%".to_owned())));
        // scenario 3: MaxSurge = "50%", baseline = 4 -> surged count 4 + 2 = 6
        assert_eq!(compute_max_surge(&deployment, 4), 2);
    }

    #[test]
    fn malformed_percentage_defaults_to_one() {
        let deployment = deployment_with_max_surge(Some(IntOrString::String("bogus".to_owned())));
        assert_eq!(compute_max_surge(&deployment, 4), 1);
    }

    #[test]
    fn fresh_eviction_differing_from_observed_is_recent() {
        let now = Utc::now();
        let desired = EvictionRecord {
            pod_name: "pod-a".to_owned(),
            eviction_time: now.to_rfc3339(),
        };

        assert!(is_recent_eviction(
            Some(&desired),
            None,
            chrono::Duration::minutes(5),
            now
        ));
    }

    #[test]
    fn eviction_ten_minutes_old_is_not_recent() {
        let now = Utc::now();
        let desired = EvictionRecord {
            pod_name: "pod-a".to_owned(),
            eviction_time: (now - chrono::Duration::minutes(10)).to_rfc3339(),
        };

        assert!(!is_recent_eviction(
            Some(&desired),
            None,
            chrono::Duration::minutes(5),
            now
        ));
    }

    #[test]
    fn equal_to_observed_is_not_recent() {
        let now = Utc::now();
        let record = EvictionRecord {
            pod_name: "pod-a".to_owned(),
            eviction_time: now.to_rfc3339(),
        };

        assert!(!is_recent_eviction(
            Some(&record),
            Some(&record),
            chrono::Duration::minutes(5),
            now
        ));
    }

    #[test]
    fn malformed_eviction_time_is_not_recent() {
        let now = Utc::now();
        let desired = EvictionRecord {
            pod_name: "pod-a".to_owned(),
            eviction_time: "not-a-timestamp".to_owned(),
        };

        assert!(!is_recent_eviction(
            Some(&desired),
            None,
            chrono::Duration::minutes(5),
            now
        ));
    }
}
