//! kube-rs implementations of the collaborator traits

use std::fmt::Debug;

use async_trait::async_trait;
use futures::Stream;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::clients::{
    EventsClient, JobClient, PodClient, PodDisruptionBudgetClient, SecretsClient, WorkloadClient,
};
use crate::model::{LrpIdentifier, SourceType};
use crate::{
    Error, Result, FIELD_MANAGER, LABEL_GUID, LABEL_SOURCE_TYPE, LABEL_TASK_COMPLETED,
    LABEL_VERSION, TASK_COMPLETED_TRUE,
};

/// Build an Api scoped to `namespace`, or cluster-wide when `None`
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Label selector matching every object of `source_type`
pub fn source_type_selector(source_type: SourceType) -> String {
    format!("{LABEL_SOURCE_TYPE}={source_type}")
}

/// Watch stream over objects of `source_type` in `namespace` (all when `None`)
pub fn source_type_watch<K>(
    client: &Client,
    namespace: Option<&str>,
    source_type: SourceType,
) -> impl Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + 'static,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = scoped_api(client, namespace);
    watcher::watcher(api, watcher::Config::default().labels(&source_type_selector(source_type)))
}

fn identifier_selector(id: &LrpIdentifier) -> String {
    format!("{}={},{}={}", LABEL_GUID, id.guid, LABEL_VERSION, id.version)
}

fn task_selector(guid: Option<&str>, include_completed: bool) -> String {
    let mut selector = format!("{}={}", LABEL_SOURCE_TYPE, SourceType::Task);
    if let Some(guid) = guid {
        selector.push_str(&format!(",{LABEL_GUID}={guid}"));
    }
    if !include_completed {
        selector.push_str(&format!(",{LABEL_TASK_COMPLETED}!={TASK_COMPLETED_TRUE}"));
    }
    selector
}

/// StatefulSet client
pub struct KubeWorkloadClient {
    client: Client,
    namespace: Option<String>,
}

impl KubeWorkloadClient {
    /// Create a client; `namespace` scopes list calls
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn listing_api(&self) -> Api<StatefulSet> {
        scoped_api(&self.client, self.namespace.as_deref())
    }

    async fn list(&self, selector: &str) -> Result<Vec<StatefulSet>> {
        let list = self
            .listing_api()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::from_kube("list statefulsets", "StatefulSet", selector, e))?;
        Ok(list.items)
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn create(&self, namespace: &str, statefulset: &StatefulSet) -> Result<StatefulSet> {
        let name = statefulset.name_any();
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        debug!(%namespace, %name, "creating statefulset");
        api.create(&PostParams::default(), statefulset)
            .await
            .map_err(|e| Error::from_kube("create statefulset", "StatefulSet", &name, e))
    }

    async fn update(&self, namespace: &str, statefulset: &StatefulSet) -> Result<StatefulSet> {
        let name = statefulset.name_any();
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), statefulset)
            .await
            .map_err(|e| Error::from_kube("update statefulset", "StatefulSet", &name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube("delete statefulset", "StatefulSet", name, e))?;
        Ok(())
    }

    async fn get_by_source_type(&self, source_type: SourceType) -> Result<Vec<StatefulSet>> {
        self.list(&source_type_selector(source_type)).await
    }

    async fn get_by_identifier(&self, id: &LrpIdentifier) -> Result<Vec<StatefulSet>> {
        self.list(&identifier_selector(id)).await
    }
}

/// Pod client
pub struct KubePodClient {
    client: Client,
    namespace: Option<String>,
}

impl KubePodClient {
    /// Create a client; `namespace` scopes list calls
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    async fn list(&self, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = scoped_api(&self.client, self.namespace.as_deref());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::from_kube("list pods", "Pod", selector, e))?;
        Ok(list.items)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get_all(&self) -> Result<Vec<Pod>> {
        self.list(&source_type_selector(SourceType::App)).await
    }

    async fn get_by_identifier(&self, id: &LrpIdentifier) -> Result<Vec<Pod>> {
        self.list(&identifier_selector(id)).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("delete pod", "Pod", name, e))?;
        Ok(())
    }
}

/// Secret client
pub struct KubeSecretsClient {
    client: Client,
}

impl KubeSecretsClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretsClient for KubeSecretsClient {
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .clone()
            .or_else(|| secret.metadata.generate_name.clone())
            .unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| Error::from_kube("create secret", "Secret", &name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube("delete secret", "Secret", name, e))?;
        Ok(())
    }

    async fn set_owner(&self, secret: &Secret, owner: &OwnerReference) -> Result<Secret> {
        let name = secret.name_any();
        let namespace = secret.namespace().unwrap_or_default();
        let mut owners = secret.metadata.owner_references.clone().unwrap_or_default();
        owners.push(owner.clone());

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "metadata": { "ownerReferences": owners } });
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("set secret owner", "Secret", &name, e))
    }
}

/// PodDisruptionBudget client
pub struct KubePodDisruptionBudgetClient {
    client: Client,
}

impl KubePodDisruptionBudgetClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodDisruptionBudgetClient for KubePodDisruptionBudgetClient {
    async fn create(
        &self,
        namespace: &str,
        budget: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget> {
        let name = budget.name_any();
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), budget)
            .await
            .map_err(|e| {
                Error::from_kube("create pod disruption budget", "PodDisruptionBudget", &name, e)
            })
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                Error::from_kube("delete pod disruption budget", "PodDisruptionBudget", name, e)
            })?;
        debug!(budget = %name, "deleted pod disruption budget");
        Ok(())
    }
}

/// Event client
pub struct KubeEventsClient {
    client: Client,
}

impl KubeEventsClient {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventsClient for KubeEventsClient {
    async fn get_by_pod(&self, pod: &Pod) -> Result<Vec<Event>> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        let fields = format!(
            "involvedObject.namespace={},involvedObject.uid={},involvedObject.name={}",
            namespace,
            pod.uid().unwrap_or_default(),
            name
        );
        let mut events = api
            .list(&ListParams::default().fields(&fields))
            .await
            .map_err(|e| Error::from_kube("list events", "Event", &name, e))?
            .items;
        events.sort_by_key(|e| e.last_timestamp.as_ref().map(|t| t.0));
        Ok(events)
    }
}

/// Job client
pub struct KubeJobClient {
    client: Client,
    namespace: Option<String>,
}

impl KubeJobClient {
    /// Create a client; `namespace` scopes list calls
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    async fn list_selected(&self, selector: &str) -> Result<Vec<Job>> {
        let api: Api<Job> = scoped_api(&self.client, self.namespace.as_deref());
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::from_kube("list jobs", "Job", selector, e))?;
        Ok(list.items)
    }
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn create(&self, namespace: &str, job: &Job) -> Result<Job> {
        let name = job.name_any();
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job)
            .await
            .map_err(|e| Error::from_kube("create job", "Job", &name, e))
    }

    async fn list(&self, include_completed: bool) -> Result<Vec<Job>> {
        self.list_selected(&task_selector(None, include_completed)).await
    }

    async fn get_by_guid(&self, guid: &str, include_completed: bool) -> Result<Vec<Job>> {
        self.list_selected(&task_selector(Some(guid), include_completed)).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube("delete job", "Job", name, e))?;
        Ok(())
    }

    async fn set_label(&self, job: &Job, key: &str, value: &str) -> Result<Job> {
        let name = job.name_any();
        let namespace = job.namespace().unwrap_or_default();
        let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "metadata": { "labels": { key: value } } });
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("label job", "Job", &name, e))
    }
}
