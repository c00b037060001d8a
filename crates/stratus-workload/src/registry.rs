//! Image-pull secrets for private registries

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::Serialize;
use stratus_common::model::{PrivateRegistry, Task};
use stratus_common::naming;
use stratus_common::Result;

/// Secret type understood by the kubelet for image pulls
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Data key holding the docker config
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

/// Render the `.dockerconfigjson` payload for `registry`
pub fn docker_config_json(registry: &PrivateRegistry) -> Result<String> {
    let auth = STANDARD.encode(format!("{}:{}", registry.username, registry.password));
    let config = DockerConfig {
        auths: BTreeMap::from([(
            registry.server.as_str(),
            DockerAuth {
                username: &registry.username,
                password: &registry.password,
                auth,
            },
        )]),
    };
    Ok(serde_json::to_string(&config)?)
}

fn pull_secret(metadata: ObjectMeta, registry: &PrivateRegistry) -> Result<Secret> {
    let payload = docker_config_json(registry)?;
    Ok(Secret {
        metadata,
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(payload.into_bytes()),
        )])),
        ..Default::default()
    })
}

/// Pull secret for an LRP, named after its StatefulSet
pub fn lrp_pull_secret(
    namespace: &str,
    statefulset_name: &str,
    registry: &PrivateRegistry,
) -> Result<Secret> {
    pull_secret(
        ObjectMeta {
            name: Some(naming::lrp_registry_secret_name(statefulset_name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        registry,
    )
}

/// Pull secret for a task; the API server completes the generated name
pub fn task_pull_secret(
    namespace: &str,
    task: &Task,
    registry: &PrivateRegistry,
) -> Result<Secret> {
    let prefix = naming::task_registry_secret_prefix(&task.app_name, &task.space_name, &task.guid);
    pull_secret(
        ObjectMeta {
            generate_name: Some(format!("{prefix}-")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        registry,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PrivateRegistry {
        PrivateRegistry {
            server: "registry.example.com".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[test]
    fn docker_config_carries_base64_auth() {
        let raw = docker_config_json(&registry()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let auth = &value["auths"]["registry.example.com"];

        assert_eq!(auth["username"], "user");
        assert_eq!(auth["password"], "pass");
        assert_eq!(auth["auth"], STANDARD.encode("user:pass"));
    }

    #[test]
    fn lrp_secret_is_named_after_statefulset() {
        let secret = lrp_pull_secret("ns", "app-space-abcdef0123", &registry()).unwrap();
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("app-space-abcdef0123-registry-credentials")
        );
        assert_eq!(secret.type_.as_deref(), Some(DOCKER_CONFIG_JSON_TYPE));
        assert!(secret.data.unwrap().contains_key(DOCKER_CONFIG_JSON_KEY));
    }

    #[test]
    fn task_secret_uses_generated_name() {
        let task = Task {
            guid: "task-guid".to_string(),
            app_name: "my-app".to_string(),
            space_name: "my-space".to_string(),
            ..Default::default()
        };
        let secret = task_pull_secret("ns", &task, &registry()).unwrap();
        assert!(secret.metadata.name.is_none());
        assert_eq!(
            secret.metadata.generate_name.as_deref(),
            Some("my-app-my-space-registry-secret-task-guid-")
        );
    }
}
