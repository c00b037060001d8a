//! Container environment assembly
//!
//! Three sources are merged, later ones winning on key collision:
//! platform-injected instance values, the caller's environment, and the
//! lifecycle overrides. Field-ref variables resolved by the kubelet are
//! appended for names nobody set explicitly.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector};
use serde::Serialize;
use stratus_common::model::Lifecycle;

/// Pod name, resolved from `metadata.name`
pub const ENV_POD_NAME: &str = "POD_NAME";
/// Instance GUID, resolved from `metadata.uid`
pub const ENV_CF_INSTANCE_GUID: &str = "CF_INSTANCE_GUID";
/// Node IP, resolved from `status.hostIP`
pub const ENV_CF_INSTANCE_IP: &str = "CF_INSTANCE_IP";
/// Pod IP, resolved from `status.podIP`
pub const ENV_CF_INSTANCE_INTERNAL_IP: &str = "CF_INSTANCE_INTERNAL_IP";
/// Listen address
pub const ENV_CF_INSTANCE_ADDR: &str = "CF_INSTANCE_ADDR";
/// Primary port
pub const ENV_CF_INSTANCE_PORT: &str = "CF_INSTANCE_PORT";
/// JSON list of port mappings
pub const ENV_CF_INSTANCE_PORTS: &str = "CF_INSTANCE_PORTS";
/// Primary port, as most buildpacks expect it
pub const ENV_PORT: &str = "PORT";
/// Buildpack start command handed to the launcher
pub const ENV_START_COMMAND: &str = "START_COMMAND";
/// Staging droplet location
pub const ENV_DROPLET_PATH: &str = "DROPLET_PATH";

const FIELD_REFS: [(&str, &str); 4] = [
    (ENV_POD_NAME, "metadata.name"),
    (ENV_CF_INSTANCE_GUID, "metadata.uid"),
    (ENV_CF_INSTANCE_IP, "status.hostIP"),
    (ENV_CF_INSTANCE_INTERNAL_IP, "status.podIP"),
];

#[derive(Serialize)]
struct PortMapping {
    external: i32,
    internal: i32,
}

/// Instance address and port placeholders for an LRP listening on `ports`
pub fn lrp_platform_env(ports: &[i32]) -> BTreeMap<String, String> {
    let Some(&primary) = ports.first() else {
        return task_platform_env();
    };

    let mappings: Vec<PortMapping> = ports
        .iter()
        .map(|&p| PortMapping {
            external: p,
            internal: p,
        })
        .collect();

    BTreeMap::from([
        (ENV_CF_INSTANCE_ADDR.to_string(), format!("0.0.0.0:{primary}")),
        (ENV_CF_INSTANCE_PORT.to_string(), primary.to_string()),
        (
            ENV_CF_INSTANCE_PORTS.to_string(),
            serde_json::to_string(&mappings).unwrap_or_else(|_| "[]".to_string()),
        ),
        (ENV_PORT.to_string(), primary.to_string()),
    ])
}

/// Tasks do not listen; their address placeholders are empty
pub fn task_platform_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENV_CF_INSTANCE_ADDR.to_string(), String::new()),
        (ENV_CF_INSTANCE_PORT.to_string(), String::new()),
        (ENV_CF_INSTANCE_PORTS.to_string(), "[]".to_string()),
    ])
}

/// Overrides contributed by the lifecycle
pub fn lifecycle_env(lifecycle: &Lifecycle) -> BTreeMap<String, String> {
    match lifecycle {
        Lifecycle::Docker => BTreeMap::new(),
        Lifecycle::Buildpack { start_command } => {
            BTreeMap::from([(ENV_START_COMMAND.to_string(), start_command.clone())])
        }
        Lifecycle::Staging { droplet_path } => {
            BTreeMap::from([(ENV_DROPLET_PATH.to_string(), droplet_path.clone())])
        }
    }
}

/// Merge platform, caller and lifecycle environments into container env vars
pub fn compile(
    platform: BTreeMap<String, String>,
    caller: &BTreeMap<String, String>,
    lifecycle: &Lifecycle,
) -> Vec<EnvVar> {
    let mut merged = platform;
    merged.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(lifecycle_env(lifecycle));

    let field_refs: Vec<EnvVar> = FIELD_REFS
        .iter()
        .filter(|(name, _)| !merged.contains_key(*name))
        .map(|(name, path)| field_ref(name, path))
        .collect();

    merged
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .chain(field_refs)
        .collect()
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn story_later_sources_win() {
        let caller = BTreeMap::from([
            ("PORT".to_string(), "9000".to_string()),
            ("START_COMMAND".to_string(), "ignored".to_string()),
            ("FOO".to_string(), "bar".to_string()),
        ]);
        let lifecycle = Lifecycle::Buildpack {
            start_command: "bundle exec rackup".to_string(),
        };

        let env = compile(lrp_platform_env(&[8080]), &caller, &lifecycle);

        assert_eq!(value_of(&env, "PORT"), Some("9000"));
        assert_eq!(value_of(&env, "CF_INSTANCE_PORT"), Some("8080"));
        assert_eq!(value_of(&env, "START_COMMAND"), Some("bundle exec rackup"));
        assert_eq!(value_of(&env, "FOO"), Some("bar"));
    }

    #[test]
    fn field_refs_are_injected_unless_overridden() {
        let caller = BTreeMap::from([("POD_NAME".to_string(), "fixed".to_string())]);
        let env = compile(task_platform_env(), &caller, &Lifecycle::Docker);

        let pod_names: Vec<_> = env.iter().filter(|e| e.name == "POD_NAME").collect();
        assert_eq!(pod_names.len(), 1);
        assert_eq!(pod_names[0].value.as_deref(), Some("fixed"));

        let guid = env.iter().find(|e| e.name == "CF_INSTANCE_GUID").unwrap();
        let path = &guid.value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path;
        assert_eq!(path, "metadata.uid");
    }

    #[test]
    fn platform_env_lists_every_port() {
        let env = lrp_platform_env(&[8080, 9090]);
        assert_eq!(env["CF_INSTANCE_ADDR"], "0.0.0.0:8080");
        assert_eq!(
            env["CF_INSTANCE_PORTS"],
            r#"[{"external":8080,"internal":8080},{"external":9090,"internal":9090}]"#
        );
    }

    #[test]
    fn tasks_have_empty_address_placeholders() {
        let env = task_platform_env();
        assert_eq!(env["CF_INSTANCE_ADDR"], "");
        assert_eq!(env["CF_INSTANCE_PORTS"], "[]");
        assert_eq!(lrp_platform_env(&[]), env);
    }
}
