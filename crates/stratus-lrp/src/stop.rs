use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use stratus_common::clients::{
    PodClient, PodDisruptionBudgetClient, SecretsClient, WorkloadClient,
};
use stratus_common::model::LrpIdentifier;
use stratus_common::{naming, Error, Result};
use tracing::{debug, info, instrument};

use crate::{delete_disruption_budget, get_statefulset};

/// Removes StatefulSets and individual instances
pub struct Stopper {
    workloads: Arc<dyn WorkloadClient>,
    pods: Arc<dyn PodClient>,
    secrets: Arc<dyn SecretsClient>,
    budgets: Arc<dyn PodDisruptionBudgetClient>,
}

impl Stopper {
    /// Create a stopper
    pub fn new(
        workloads: Arc<dyn WorkloadClient>,
        pods: Arc<dyn PodClient>,
        secrets: Arc<dyn SecretsClient>,
        budgets: Arc<dyn PodDisruptionBudgetClient>,
    ) -> Self {
        Self {
            workloads,
            pods,
            secrets,
            budgets,
        }
    }

    /// Delete the StatefulSet for `id`, its private-registry secret and its
    /// PodDisruptionBudget
    #[instrument(skip(self), fields(guid = %id.guid, version = %id.version))]
    pub async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        let statefulset = get_statefulset(self.workloads.as_ref(), id).await?;
        let (namespace, name) = namespace_and_name(&statefulset)?;

        self.workloads.delete(&namespace, &name).await?;
        info!(statefulset = %name, "stopped lrp");

        delete_disruption_budget(self.budgets.as_ref(), &namespace, &name).await?;

        let secret_name = naming::lrp_registry_secret_name(&name);
        if references_pull_secret(&statefulset, &secret_name) {
            match self.secrets.delete(&namespace, &secret_name).await {
                Err(e) if e.is_not_found() => {
                    debug!(secret = %secret_name, "registry secret already gone")
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Delete the pod backing instance `index`
    ///
    /// The StatefulSet controller recreates it. A pod that is already gone
    /// counts as stopped.
    #[instrument(skip(self), fields(guid = %id.guid, version = %id.version))]
    pub async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        let statefulset = get_statefulset(self.workloads.as_ref(), id).await?;
        let (namespace, name) = namespace_and_name(&statefulset)?;

        let replicas = statefulset
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        if i64::from(index) >= i64::from(replicas) {
            return Err(Error::validation(format!(
                "invalid instance index {index} for {replicas} replicas"
            )));
        }

        let pod_name = format!("{name}-{index}");
        match self.pods.delete(&namespace, &pod_name).await {
            Err(e) if e.is_not_found() => {
                debug!(pod = %pod_name, "instance already gone");
                Ok(())
            }
            other => other,
        }
    }
}

fn namespace_and_name(statefulset: &StatefulSet) -> Result<(String, String)> {
    let namespace = statefulset
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::validation("statefulset has no namespace"))?;
    let name = statefulset
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("statefulset has no name"))?;
    Ok((namespace, name))
}

fn references_pull_secret(statefulset: &StatefulSet, secret_name: &str) -> bool {
    statefulset
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| pod.image_pull_secrets.as_ref())
        .is_some_and(|secrets| secrets.iter().any(|s| s.name == secret_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::clients::{
        MockPodClient, MockPodDisruptionBudgetClient, MockSecretsClient, MockWorkloadClient,
    };
    use stratus_common::model::PrivateRegistry;

    use crate::fixtures::{budgets, lrp, stored, NAMESPACE};

    fn workloads_returning(existing: Vec<StatefulSet>) -> MockWorkloadClient {
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_get_by_identifier()
            .returning(move |_| Ok(existing.clone()));
        workloads
    }

    #[tokio::test]
    async fn story_stop_deletes_statefulset_only() {
        let existing = stored(&lrp());
        let name = existing.metadata.name.clone().unwrap();

        let mut workloads = workloads_returning(vec![existing]);
        workloads
            .expect_delete()
            .withf(move |ns, n| ns == NAMESPACE && n == name)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut secrets = MockSecretsClient::new();
        secrets.expect_delete().never();

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(secrets),
            Arc::new(budgets()),
        );
        stopper.stop(&lrp().id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_removes_private_registry_secret_and_tolerates_its_absence() {
        let mut private = lrp();
        private.private_registry = Some(PrivateRegistry {
            server: "r".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        });
        let existing = stored(&private);
        let expected = naming::lrp_registry_secret_name(existing.metadata.name.as_deref().unwrap());

        let mut workloads = workloads_returning(vec![existing]);
        workloads.expect_delete().returning(|_, _| Ok(()));
        let mut secrets = MockSecretsClient::new();
        secrets
            .expect_delete()
            .withf(move |_, n| n == expected)
            .times(1)
            .returning(|_, n| Err(Error::not_found("Secret", n)));

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(secrets),
            Arc::new(budgets()),
        );
        stopper.stop(&private.id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_missing_lrp_is_not_found() {
        let mut workloads = workloads_returning(vec![]);
        workloads.expect_delete().never();

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets()),
        );
        assert!(stopper.stop(&lrp().id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn story_stop_instance_deletes_indexed_pod() {
        let existing = stored(&lrp());
        let expected = format!("{}-1", existing.metadata.name.as_deref().unwrap());

        let mut pods = MockPodClient::new();
        pods.expect_delete()
            .withf(move |ns, n| ns == NAMESPACE && n == expected)
            .times(1)
            .returning(|_, _| Ok(()));

        let stopper = Stopper::new(
            Arc::new(workloads_returning(vec![existing])),
            Arc::new(pods),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets()),
        );
        stopper.stop_instance(&lrp().id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn stop_instance_rejects_out_of_range_index() {
        let mut pods = MockPodClient::new();
        pods.expect_delete().never();

        let stopper = Stopper::new(
            Arc::new(workloads_returning(vec![stored(&lrp())])),
            Arc::new(pods),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets()),
        );
        let err = stopper.stop_instance(&lrp().id, 2).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn stop_instance_of_vanished_pod_succeeds() {
        let mut pods = MockPodClient::new();
        pods.expect_delete()
            .returning(|_, n| Err(Error::not_found("Pod", n)));

        let stopper = Stopper::new(
            Arc::new(workloads_returning(vec![stored(&lrp())])),
            Arc::new(pods),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets()),
        );
        stopper.stop_instance(&lrp().id, 0).await.unwrap();
    }

    #[tokio::test]
    async fn story_stop_removes_the_budget_after_the_statefulset() {
        let existing = stored(&lrp());
        let name = existing.metadata.name.clone().unwrap();

        let mut workloads = workloads_returning(vec![existing]);
        workloads.expect_delete().times(1).returning(|_, _| Ok(()));
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_delete()
            .withf(move |ns, n| ns == NAMESPACE && n == name)
            .times(1)
            .returning(|_, _| Ok(()));

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets),
        );
        stopper.stop(&lrp().id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_a_budget_succeeds() {
        let mut workloads = workloads_returning(vec![stored(&lrp())]);
        workloads.expect_delete().returning(|_, _| Ok(()));
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_delete()
            .returning(|_, n| Err(Error::not_found("PodDisruptionBudget", n)));

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets),
        );
        stopper.stop(&lrp().id).await.unwrap();
    }

    #[tokio::test]
    async fn budget_deletion_failure_is_surfaced() {
        let mut workloads = workloads_returning(vec![stored(&lrp())]);
        workloads.expect_delete().returning(|_, _| Ok(()));
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_delete()
            .returning(|_, _| Err(Error::validation("pdb rejected")));

        let stopper = Stopper::new(
            Arc::new(workloads),
            Arc::new(MockPodClient::new()),
            Arc::new(MockSecretsClient::new()),
            Arc::new(budgets),
        );
        let err = stopper.stop(&lrp().id).await.unwrap_err();
        assert!(err.to_string().contains("pdb rejected"));
    }
}
