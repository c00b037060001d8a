//! Task → Job conversion

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, LocalObjectReference, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use stratus_common::model::{SourceType, Task};
use stratus_common::{naming, Config, Result};
use stratus_common::{
    ANNOTATION_APP_GUID, ANNOTATION_APP_NAME, ANNOTATION_COMPLETION_CALLBACK, ANNOTATION_ORG_GUID,
    ANNOTATION_ORG_NAME, ANNOTATION_SPACE_GUID, ANNOTATION_SPACE_NAME, LABEL_APP_GUID, LABEL_GUID,
    LABEL_SOURCE_TYPE, TASK_CONTAINER_NAME,
};

use crate::converter::TaskConverter;
use crate::{env, resources};

/// Production [`TaskConverter`]
#[derive(Clone, Debug)]
pub struct TaskToJob {
    service_account: String,
    registry_secret_name: String,
    allow_run_as_root: bool,
    allow_automount_token: bool,
    active_deadline_seconds: i64,
    default_memory_mb: i64,
    default_disk_mb: i64,
    default_cpu_weight: u8,
}

impl TaskToJob {
    /// Create a converter from the engine configuration
    pub fn new(config: &Config) -> Self {
        Self {
            service_account: config.application_service_account.clone(),
            registry_secret_name: config.registry_secret_name.clone(),
            allow_run_as_root: config.allow_run_image_as_root,
            allow_automount_token: config.allow_automount_service_account_token,
            active_deadline_seconds: config.task_active_deadline_seconds,
            default_memory_mb: config.default_memory_mb,
            default_disk_mb: config.default_disk_mb,
            default_cpu_weight: config.default_cpu_weight,
        }
    }

    fn container(&self, task: &Task) -> Container {
        let memory = if task.memory_mb == 0 { self.default_memory_mb } else { task.memory_mb };
        let disk = if task.disk_mb == 0 { self.default_disk_mb } else { task.disk_mb };
        let cpu = if task.cpu_weight == 0 { self.default_cpu_weight } else { task.cpu_weight };

        Container {
            name: TASK_CONTAINER_NAME.to_string(),
            image: Some(task.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(task.command.clone()),
            env: Some(env::compile(env::task_platform_env(), &task.env, &task.lifecycle)),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                ..Default::default()
            }),
            resources: Some(resources::container_resources(cpu, memory, disk)),
            ..Default::default()
        }
    }
}

impl TaskConverter for TaskToJob {
    fn convert(&self, task: &Task, registry_secret: Option<String>) -> Result<Job> {
        let labels = BTreeMap::from([
            (LABEL_GUID.to_string(), task.guid.clone()),
            (LABEL_APP_GUID.to_string(), task.app_guid.clone()),
            (LABEL_SOURCE_TYPE.to_string(), SourceType::Task.to_string()),
        ]);
        let annotations = BTreeMap::from([
            (
                ANNOTATION_COMPLETION_CALLBACK.to_string(),
                task.completion_callback.clone(),
            ),
            (ANNOTATION_APP_NAME.to_string(), task.app_name.clone()),
            (ANNOTATION_APP_GUID.to_string(), task.app_guid.clone()),
            (ANNOTATION_SPACE_NAME.to_string(), task.space_name.clone()),
            (ANNOTATION_SPACE_GUID.to_string(), task.space_guid.clone()),
            (ANNOTATION_ORG_NAME.to_string(), task.org_name.clone()),
            (ANNOTATION_ORG_GUID.to_string(), task.org_guid.clone()),
        ]);

        let mut pull_secrets = vec![LocalObjectReference {
            name: self.registry_secret_name.clone(),
        }];
        if let Some(name) = registry_secret {
            pull_secrets.push(LocalObjectReference { name });
        }

        let pod_spec = PodSpec {
            containers: vec![self.container(task)],
            restart_policy: Some("Never".to_string()),
            image_pull_secrets: Some(pull_secrets),
            service_account_name: Some(self.service_account.clone()),
            automount_service_account_token: (!self.allow_automount_token).then_some(false),
            security_context: Some(PodSecurityContext {
                run_as_non_root: (!self.allow_run_as_root).then_some(true),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(naming::job_name(task)),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                parallelism: Some(1),
                completions: Some(1),
                backoff_limit: Some(0),
                active_deadline_seconds: Some(self.active_deadline_seconds),
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
