//! Deterministic, DNS-label-safe object names
//!
//! Names are derived from app and space names so operators can recognise
//! workloads in `kubectl get`, with the GUID as a fallback whenever the
//! human-readable part cannot be made valid. The same input always yields the
//! same name.

use sha2::{Digest, Sha256};

use crate::model::{Lrp, Task};

/// Maximum length of the human-readable prefix
pub const SANITIZED_PREFIX_MAX_LEN: usize = 40;

/// Maximum length of a generated job name
pub const JOB_NAME_MAX_LEN: usize = 50;

/// Kubernetes limit for a DNS label
pub const DNS_LABEL_MAX_LEN: usize = 63;

const NAME_HASH_LEN: usize = 10;

/// Sanitize `name` to at most [`SANITIZED_PREFIX_MAX_LEN`] characters.
///
/// `fallback` is scrubbed and used when `name` is unusable.
pub fn sanitize_name(name: &str, fallback: &str) -> String {
    sanitize_name_with_max_len(name, fallback, SANITIZED_PREFIX_MAX_LEN)
}

/// Sanitize `name` to at most `max_len` characters, using `fallback` when it is unusable
///
/// Lowercases and maps `_` to `-`. Anything still not a DNS label falls back
/// to `fallback` with invalid characters dropped, or to a hash of it when
/// nothing usable is left. Truncation never leaves a trailing `-`.
pub fn sanitize_name_with_max_len(name: &str, fallback: &str, max_len: usize) -> String {
    let lowered = name.to_lowercase().replace('_', "-");
    if is_label_shaped(&lowered) {
        return truncate(&lowered, max_len);
    }

    let scrubbed: String = fallback
        .to_lowercase()
        .replace('_', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    let scrubbed = truncate(scrubbed.trim_start_matches('-'), max_len);
    if !scrubbed.is_empty() {
        return scrubbed;
    }

    let digest = hex::encode(Sha256::digest(fallback.as_bytes()));
    truncate(&format!("name-{}", &digest[..NAME_HASH_LEN]), max_len)
}

/// Name of the StatefulSet materializing `lrp`
///
/// `<sanitized app-space>-<first 10 hex chars of sha256(guid-version)>`.
pub fn statefulset_name(lrp: &Lrp) -> String {
    let prefix = sanitize_name(&format!("{}-{}", lrp.app_name, lrp.space_name), &lrp.id.guid);
    let digest = hex::encode(Sha256::digest(lrp.id.process_guid().as_bytes()));
    format!("{}-{}", prefix, &digest[..NAME_HASH_LEN])
}

/// Name of the Job materializing `task`
pub fn job_name(task: &Task) -> String {
    let mut name = sanitize_name(&format!("{}-{}", task.app_name, task.space_name), &task.guid);
    if !task.name.is_empty() {
        name = format!("{}-{}", name, task.name);
    }
    sanitize_name_with_max_len(&name, &task.guid, JOB_NAME_MAX_LEN)
}

/// Name of the private-registry pull secret created for a StatefulSet
pub fn lrp_registry_secret_name(statefulset_name: &str) -> String {
    format!("{statefulset_name}-registry-credentials")
}

/// Prefix of the private-registry pull secret created for a task
///
/// Secrets are created with this as `generateName`; deletion matches on the
/// exact prefix so secrets this engine did not create are never touched.
pub fn task_registry_secret_prefix(app_name: &str, space_name: &str, guid: &str) -> String {
    format!(
        "{}-registry-secret-{}",
        sanitize_name(&format!("{app_name}-{space_name}"), guid),
        guid
    )
}

/// Instance index of a StatefulSet pod named `<statefulset>-<index>`
pub fn instance_index(pod_name: &str) -> Option<i32> {
    pod_name.rsplit_once('-')?.1.parse().ok()
}

/// True if `s` is a valid RFC 1123 DNS label
pub fn is_dns_label(s: &str) -> bool {
    s.len() <= DNS_LABEL_MAX_LEN && is_label_shaped(s)
}

/// DNS label character rules without the length limit
fn is_label_shaped(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let bytes = s.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(bytes[0])
        && alnum(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| alnum(b) || b == b'-')
}

fn truncate(s: &str, max_len: usize) -> String {
    let cut: String = s.chars().take(max_len).collect();
    cut.trim_end_matches('-').to_string()
}
