//! LRP ⇄ StatefulSet conversion

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, LocalObjectReference, PersistentVolumeClaimVolumeSource,
    PodAffinityTerm, PodAntiAffinity, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, Secret, SecurityContext, Volume, VolumeMount as K8sVolumeMount,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use stratus_common::model::{self, Lrp, LrpIdentifier, RouteSet, SourceType, VolumeMount};
use stratus_common::{naming, Config, Error, Result};
use stratus_common::{
    ANNOTATION_APP_GUID, ANNOTATION_APP_NAME, ANNOTATION_LAST_UPDATED, ANNOTATION_ORG_GUID,
    ANNOTATION_ORG_NAME, ANNOTATION_PROCESS_GUID, ANNOTATION_REGISTERED_ROUTES,
    ANNOTATION_SPACE_GUID, ANNOTATION_SPACE_NAME, ANNOTATION_VERSION, APP_CONTAINER_NAME,
    LABEL_APP_GUID, LABEL_GUID, LABEL_PROCESS_TYPE, LABEL_SOURCE_TYPE, LABEL_VERSION,
};

use crate::converter::LrpConverter;
use crate::{env, probes, registry, resources};

const POD_ANTI_AFFINITY_WEIGHT: i32 = 100;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Production [`LrpConverter`]
#[derive(Clone, Debug)]
pub struct LrpToStatefulSet {
    service_account: String,
    registry_secret_name: String,
    allow_run_as_root: bool,
    allow_automount_token: bool,
    default_memory_mb: i64,
    default_disk_mb: i64,
    default_cpu_weight: u8,
}

impl LrpToStatefulSet {
    /// Create a converter from the engine configuration
    pub fn new(config: &Config) -> Self {
        Self {
            service_account: config.application_service_account.clone(),
            registry_secret_name: config.registry_secret_name.clone(),
            allow_run_as_root: config.allow_run_image_as_root,
            allow_automount_token: config.allow_automount_service_account_token,
            default_memory_mb: config.default_memory_mb,
            default_disk_mb: config.default_disk_mb,
            default_cpu_weight: config.default_cpu_weight,
        }
    }

    fn image_pull_secrets(&self, statefulset_name: &str, lrp: &Lrp) -> Vec<LocalObjectReference> {
        let mut secrets = vec![LocalObjectReference {
            name: self.registry_secret_name.clone(),
        }];
        if lrp.private_registry.is_some() {
            secrets.push(LocalObjectReference {
                name: naming::lrp_registry_secret_name(statefulset_name),
            });
        }
        secrets
    }

    fn container(&self, lrp: &Lrp, volume_mounts: Vec<K8sVolumeMount>) -> Container {
        let memory = non_zero_or(lrp.memory_mb, self.default_memory_mb);
        let disk = non_zero_or(lrp.disk_mb, self.default_disk_mb);
        let cpu = if lrp.cpu_weight == 0 {
            self.default_cpu_weight
        } else {
            lrp.cpu_weight
        };

        Container {
            name: APP_CONTAINER_NAME.to_string(),
            image: Some(lrp.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(lrp.command.clone()),
            env: Some(env::compile(
                env::lrp_platform_env(&lrp.ports),
                &lrp.env,
                &lrp.lifecycle,
            )),
            ports: Some(
                lrp.ports
                    .iter()
                    .map(|&port| ContainerPort {
                        container_port: port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                ..Default::default()
            }),
            resources: Some(resources::container_resources(cpu, memory, disk)),
            liveness_probe: probes::liveness_probe(&lrp.health),
            readiness_probe: probes::readiness_probe(&lrp.health),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        }
    }

    fn pod_security_context(&self) -> PodSecurityContext {
        PodSecurityContext {
            run_as_non_root: (!self.allow_run_as_root).then_some(true),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl LrpConverter for LrpToStatefulSet {
    fn convert(&self, lrp: &Lrp) -> Result<StatefulSet> {
        let name = naming::statefulset_name(lrp);
        let (volumes, volume_mounts) = volume_specs(&lrp.volume_mounts);
        let selector = selector_labels(&lrp.id);
        let routes: RouteSet = lrp.app_uris.iter().cloned().collect();

        let labels = BTreeMap::from([
            (LABEL_GUID.to_string(), lrp.id.guid.clone()),
            (LABEL_VERSION.to_string(), lrp.id.version.clone()),
            (LABEL_SOURCE_TYPE.to_string(), SourceType::App.to_string()),
            (LABEL_APP_GUID.to_string(), lrp.app_guid.clone()),
            (LABEL_PROCESS_TYPE.to_string(), lrp.process_type.clone()),
        ]);

        let mut annotations = BTreeMap::from([
            (ANNOTATION_PROCESS_GUID.to_string(), lrp.id.process_guid()),
            (ANNOTATION_REGISTERED_ROUTES.to_string(), model::encode_routes(&routes)?),
            (ANNOTATION_LAST_UPDATED.to_string(), lrp.last_updated.clone()),
            (ANNOTATION_APP_NAME.to_string(), lrp.app_name.clone()),
            (ANNOTATION_APP_GUID.to_string(), lrp.app_guid.clone()),
            (ANNOTATION_SPACE_NAME.to_string(), lrp.space_name.clone()),
            (ANNOTATION_SPACE_GUID.to_string(), lrp.space_guid.clone()),
            (ANNOTATION_ORG_NAME.to_string(), lrp.org_name.clone()),
            (ANNOTATION_ORG_GUID.to_string(), lrp.org_guid.clone()),
            (ANNOTATION_VERSION.to_string(), lrp.id.version.clone()),
        ]);
        annotations.extend(lrp.metadata.clone());

        let pod_spec = PodSpec {
            containers: vec![self.container(lrp, volume_mounts)],
            image_pull_secrets: Some(self.image_pull_secrets(&name, lrp)),
            security_context: Some(self.pod_security_context()),
            service_account_name: Some(self.service_account.clone()),
            automount_service_account_token: (!self.allow_automount_token).then_some(false),
            volumes: Some(volumes),
            affinity: Some(anti_affinity(&selector)),
            ..Default::default()
        };

        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(name),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(lrp.target_instances),
                pod_management_policy: Some("Parallel".to_string()),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn non_zero_or(value: i64, default: i64) -> i64 {
    if value == 0 {
        default
    } else {
        value
    }
}

pub(crate) fn selector_labels(id: &LrpIdentifier) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_GUID.to_string(), id.guid.clone()),
        (LABEL_VERSION.to_string(), id.version.clone()),
        (LABEL_SOURCE_TYPE.to_string(), SourceType::App.to_string()),
    ])
}

/// Prefer spreading instances of one LRP across nodes
fn anti_affinity(selector: &BTreeMap<String, String>) -> Affinity {
    let match_expressions = selector
        .iter()
        .map(|(key, value)| LabelSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: POD_ANTI_AFFINITY_WEIGHT,
                    pod_affinity_term: PodAffinityTerm {
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(match_expressions),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_specs(mounts: &[VolumeMount]) -> (Vec<Volume>, Vec<K8sVolumeMount>) {
    mounts
        .iter()
        .map(|vm| {
            let volume = Volume {
                name: vm.claim_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: vm.claim_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mount = K8sVolumeMount {
                name: vm.claim_name.clone(),
                mount_path: vm.mount_path.clone(),
                ..Default::default()
            };
            (volume, mount)
        })
        .unzip()
}

/// Pull secret backing the private-registry reference [`LrpToStatefulSet`] adds
pub fn private_registry_secret(namespace: &str, lrp: &Lrp) -> Result<Option<Secret>> {
    lrp.private_registry
        .as_ref()
        .map(|reg| registry::lrp_pull_secret(namespace, &naming::statefulset_name(lrp), reg))
        .transpose()
}

/// Reconstruct the LRP a StatefulSet materializes
///
/// Running instances come from `status.readyReplicas`; routes from the
/// `registered-routes` annotation.
pub fn statefulset_to_lrp(statefulset: &StatefulSet) -> Result<Lrp> {
    let meta = &statefulset.metadata;
    let name = meta.name.clone().unwrap_or_default();
    let labels = meta.labels.clone().unwrap_or_default();
    let annotations = meta.annotations.clone().unwrap_or_default();

    let label = |key: &str| -> Result<String> {
        labels
            .get(key)
            .cloned()
            .ok_or_else(|| Error::validation(format!("statefulset {name} has no {key} label")))
    };
    let annotation = |key: &str| annotations.get(key).cloned().unwrap_or_default();

    let id = LrpIdentifier::new(label(LABEL_GUID)?, label(LABEL_VERSION)?);

    let spec = statefulset
        .spec
        .as_ref()
        .ok_or_else(|| Error::validation(format!("statefulset {name} has no spec")))?;
    let pod_spec = spec
        .template
        .spec
        .as_ref()
        .ok_or_else(|| Error::validation(format!("statefulset {name} has no pod spec")))?;
    let container = pod_spec
        .containers
        .iter()
        .find(|c| c.name == APP_CONTAINER_NAME)
        .or_else(|| pod_spec.containers.first())
        .ok_or_else(|| Error::validation(format!("statefulset {name} has no containers")))?;

    let app_uris = model::decode_routes(&annotation(ANNOTATION_REGISTERED_ROUTES))
        .map_err(|e| Error::serialization(format!("statefulset {name} routes: {e}")))?
        .into_iter()
        .collect();

    let limits = container
        .resources
        .as_ref()
        .and_then(|r| r.limits.clone())
        .unwrap_or_default();
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.clone())
        .unwrap_or_default();

    let env = container
        .env
        .iter()
        .flatten()
        .filter_map(|e| e.value.clone().map(|v| (e.name.clone(), v)))
        .collect();

    let volume_mounts = container
        .volume_mounts
        .iter()
        .flatten()
        .map(|vm| VolumeMount {
            mount_path: vm.mount_path.clone(),
            claim_name: vm.name.clone(),
        })
        .collect();

    Ok(Lrp {
        process_type: labels.get(LABEL_PROCESS_TYPE).cloned().unwrap_or_default(),
        app_guid: annotation(ANNOTATION_APP_GUID),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_guid: annotation(ANNOTATION_SPACE_GUID),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        org_guid: annotation(ANNOTATION_ORG_GUID),
        org_name: annotation(ANNOTATION_ORG_NAME),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        env,
        ports: container
            .ports
            .iter()
            .flatten()
            .map(|p| p.container_port)
            .collect(),
        target_instances: spec.replicas.unwrap_or(1),
        running_instances: statefulset
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
        memory_mb: limits.get("memory").and_then(resources::parse_megabytes).unwrap_or(0),
        disk_mb: limits
            .get("ephemeral-storage")
            .and_then(resources::parse_megabytes)
            .unwrap_or(0),
        cpu_weight: requests.get("cpu").and_then(resources::parse_cpu_weight).unwrap_or(0),
        volume_mounts,
        app_uris,
        last_updated: annotation(ANNOTATION_LAST_UPDATED),
        id,
        ..Default::default()
    })
}
