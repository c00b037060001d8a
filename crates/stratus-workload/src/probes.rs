//! Liveness and readiness probes from an LRP healthcheck

use k8s_openapi::api::core::v1::{HTTPGetAction, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use stratus_common::model::Healthcheck;

/// Healthcheck type producing an HTTP GET probe
pub const HEALTHCHECK_HTTP: &str = "http";
/// Healthcheck type producing a TCP socket probe
pub const HEALTHCHECK_PORT: &str = "port";

const LIVENESS_FAILURE_THRESHOLD: i32 = 4;
const READINESS_FAILURE_THRESHOLD: i32 = 1;

/// Liveness probe: initial delay is the healthcheck timeout in whole seconds
pub fn liveness_probe(health: &Healthcheck) -> Option<Probe> {
    let delay = i32::try_from(health.timeout_ms / 1000).unwrap_or(i32::MAX);
    probe(health, delay, LIVENESS_FAILURE_THRESHOLD)
}

/// Readiness probe: no initial delay, one failure marks the pod unready
pub fn readiness_probe(health: &Healthcheck) -> Option<Probe> {
    probe(health, 0, READINESS_FAILURE_THRESHOLD)
}

fn probe(health: &Healthcheck, initial_delay: i32, failure_threshold: i32) -> Option<Probe> {
    let mut probe = Probe {
        initial_delay_seconds: Some(initial_delay),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    };

    match health.type_.as_str() {
        HEALTHCHECK_HTTP => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(health.endpoint.clone()),
                port: IntOrString::Int(health.port),
                ..Default::default()
            });
        }
        HEALTHCHECK_PORT => {
            probe.tcp_socket = Some(TCPSocketAction {
                port: IntOrString::Int(health.port),
                ..Default::default()
            });
        }
        _ => return None,
    }

    Some(probe)
}
