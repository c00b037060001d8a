use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use stratus_common::clients::{PodDisruptionBudgetClient, WorkloadClient};
use stratus_common::model::{self, Lrp, RouteSet};
use stratus_common::{
    Error, Result, ANNOTATION_LAST_UPDATED, ANNOTATION_REGISTERED_ROUTES,
    ANNOTATION_UNREGISTERED_ROUTES, APP_CONTAINER_NAME,
};
use tracing::{info, instrument, warn};

use crate::{get_statefulset, sync_disruption_budget};

/// Applies scale, image and route changes to existing StatefulSets
pub struct Updater {
    workloads: Arc<dyn WorkloadClient>,
    budgets: Arc<dyn PodDisruptionBudgetClient>,
}

impl Updater {
    /// Create an updater
    pub fn new(
        workloads: Arc<dyn WorkloadClient>,
        budgets: Arc<dyn PodDisruptionBudgetClient>,
    ) -> Self {
        Self { workloads, budgets }
    }

    /// Update the StatefulSet backing `lrp`
    ///
    /// Only replicas, the application image, `last-updated` and the route
    /// annotations are touched. Routes dropped from `app_uris` are recorded in
    /// `unregistered-routes` so the route watcher can unregister them. The
    /// PodDisruptionBudget is created or removed as the instance count crosses
    /// one.
    #[instrument(skip(self, lrp), fields(guid = %lrp.id.guid, version = %lrp.id.version))]
    pub async fn update(&self, lrp: &Lrp) -> Result<StatefulSet> {
        let mut statefulset = get_statefulset(self.workloads.as_ref(), &lrp.id).await?;
        let namespace = statefulset
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::validation("statefulset has no namespace"))?;

        apply_update(&mut statefulset, lrp)?;

        let updated = self.workloads.update(&namespace, &statefulset).await?;
        let name = updated.metadata.name.clone().unwrap_or_default();
        sync_disruption_budget(self.budgets.as_ref(), &namespace, &name, lrp).await?;
        info!(replicas = lrp.target_instances, "updated lrp");
        Ok(updated)
    }
}

fn apply_update(statefulset: &mut StatefulSet, lrp: &Lrp) -> Result<()> {
    let name = statefulset.metadata.name.clone().unwrap_or_default();
    let annotations = statefulset
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new);

    let previous = annotations
        .get(ANNOTATION_REGISTERED_ROUTES)
        .map(|raw| {
            model::decode_routes(raw).unwrap_or_else(|e| {
                warn!(statefulset = %name, error = %e, "ignoring malformed registered routes");
                RouteSet::new()
            })
        })
        .unwrap_or_default();
    let desired: RouteSet = lrp.app_uris.iter().cloned().collect();
    let unregistered = previous.difference(&desired);

    annotations.insert(
        ANNOTATION_UNREGISTERED_ROUTES.to_string(),
        model::encode_routes(unregistered)?,
    );
    annotations.insert(
        ANNOTATION_REGISTERED_ROUTES.to_string(),
        model::encode_routes(&desired)?,
    );
    annotations.insert(ANNOTATION_LAST_UPDATED.to_string(), lrp.last_updated.clone());

    if let Some(spec) = statefulset.spec.as_mut() {
        spec.replicas = Some(lrp.target_instances);

        if !lrp.image.is_empty() {
            let container = spec
                .template
                .spec
                .as_mut()
                .and_then(|pod| pod.containers.iter_mut().find(|c| c.name == APP_CONTAINER_NAME));
            if let Some(container) = container {
                if container.image.as_deref() != Some(lrp.image.as_str()) {
                    container.image = Some(lrp.image.clone());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::clients::{MockPodDisruptionBudgetClient, MockWorkloadClient};
    use stratus_common::model::Route;

    use crate::fixtures::{budgets, lrp, stored, NAMESPACE};

    fn annotation(sts: &StatefulSet, key: &str) -> String {
        sts.metadata.annotations.as_ref().unwrap()[key].clone()
    }

    fn image(sts: &StatefulSet) -> Option<String> {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .image
            .clone()
    }

    fn updater_for(
        existing: StatefulSet,
        check: impl Fn(&StatefulSet) + Send + 'static,
    ) -> Updater {
        updater_with_budgets(existing, check, budgets())
    }

    fn updater_with_budgets(
        existing: StatefulSet,
        check: impl Fn(&StatefulSet) + Send + 'static,
        budgets: MockPodDisruptionBudgetClient,
    ) -> Updater {
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_get_by_identifier()
            .returning(move |_| Ok(vec![existing.clone()]));
        workloads
            .expect_update()
            .withf(|ns, _| ns == NAMESPACE)
            .times(1)
            .returning(move |_, sts| {
                check(sts);
                Ok(sts.clone())
            });
        workloads.expect_create().never();
        Updater::new(Arc::new(workloads), Arc::new(budgets))
    }

    #[tokio::test]
    async fn story_scale_up_touches_replicas_and_last_updated() {
        let existing = stored(&lrp());
        let updater = updater_for(existing, |sts| {
            assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(5));
            assert_eq!(annotation(sts, "last-updated"), "2");
            assert_eq!(sts.metadata.resource_version.as_deref(), Some("42"));
        });

        let mut desired = lrp();
        desired.target_instances = 5;
        desired.last_updated = "2".to_string();
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn story_removed_routes_are_recorded_as_unregistered() {
        let existing = stored(&lrp());
        let updater = updater_for(existing, |sts| {
            assert_eq!(annotation(sts, "registered-routes"), "[]");
            let unregistered =
                model::decode_routes(&annotation(sts, "unregistered-routes")).unwrap();
            assert_eq!(
                unregistered.into_iter().collect::<Vec<_>>(),
                vec![Route::new("foo.example.com", 8080)]
            );
        });

        let mut desired = lrp();
        desired.app_uris = vec![];
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn kept_routes_are_not_unregistered() {
        let existing = stored(&lrp());
        let updater = updater_for(existing, |sts| {
            assert_eq!(annotation(sts, "unregistered-routes"), "[]");
            let registered = model::decode_routes(&annotation(sts, "registered-routes")).unwrap();
            assert_eq!(registered.len(), 2);
        });

        let mut desired = lrp();
        desired.app_uris.push(Route::new("bar.example.com", 8080));
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn registered_routes_are_sorted_and_deduplicated() {
        let existing = stored(&lrp());
        let updater = updater_for(existing, |sts| {
            assert_eq!(
                annotation(sts, "registered-routes"),
                concat!(
                    r#"[{"hostname":"a.example.com","port":8080},"#,
                    r#"{"hostname":"foo.example.com","port":8080}]"#,
                )
            );
        });

        let mut desired = lrp();
        desired.app_uris = vec![
            Route::new("foo.example.com", 8080),
            Route::new("a.example.com", 8080),
            Route::new("foo.example.com", 8080),
        ];
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn empty_image_keeps_existing_one() {
        let updater = updater_for(stored(&lrp()), |sts| {
            assert_eq!(image(sts).as_deref(), Some("busybox"));
        });
        let mut desired = lrp();
        desired.image = String::new();
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn changed_image_is_applied() {
        let updater = updater_for(stored(&lrp()), |sts| {
            assert_eq!(image(sts).as_deref(), Some("nginx"));
        });
        let mut desired = lrp();
        desired.image = "nginx".to_string();
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn missing_statefulset_is_not_found() {
        let mut workloads = MockWorkloadClient::new();
        workloads.expect_get_by_identifier().returning(|_| Ok(vec![]));
        workloads.expect_update().never();

        let updater = Updater::new(Arc::new(workloads), Arc::new(budgets()));
        let err = updater.update(&lrp()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_conflict_is_surfaced() {
        let existing = stored(&lrp());
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_get_by_identifier()
            .returning(move |_| Ok(vec![existing.clone()]));
        workloads.expect_update().returning(|_, _| {
            Err(Error::Conflict {
                kind: "StatefulSet".to_string(),
                name: "x".to_string(),
                message: "the object has been modified".to_string(),
            })
        });

        let updater = Updater::new(Arc::new(workloads), Arc::new(budgets()));
        let err = updater.update(&lrp()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn story_scale_down_to_one_deletes_the_budget() {
        let existing = stored(&lrp());
        let name = existing.metadata.name.clone().unwrap();
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets.expect_create().never();
        budgets
            .expect_delete()
            .withf(move |ns, n| ns == NAMESPACE && n == name)
            .times(1)
            .returning(|_, _| Ok(()));

        let updater = updater_with_budgets(existing, |_| {}, budgets);
        let mut desired = lrp();
        desired.target_instances = 1;
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn scale_down_without_a_budget_succeeds() {
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_delete()
            .returning(|_, n| Err(Error::not_found("PodDisruptionBudget", n)));

        let updater = updater_with_budgets(stored(&lrp()), |_| {}, budgets);
        let mut desired = lrp();
        desired.target_instances = 1;
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn budget_deletion_error_is_surfaced() {
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_delete()
            .returning(|_, _| Err(Error::validation("pow")));

        let updater = updater_with_budgets(stored(&lrp()), |_| {}, budgets);
        let mut desired = lrp();
        desired.target_instances = 1;
        let err = updater.update(&desired).await.unwrap_err();
        assert!(err.to_string().contains("pow"));
    }

    #[tokio::test]
    async fn story_scale_up_creates_budget_in_statefulset_namespace() {
        let mut single = lrp();
        single.target_instances = 1;
        let existing = stored(&single);
        let name = existing.metadata.name.clone().unwrap();

        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets.expect_delete().never();
        budgets
            .expect_create()
            .withf(move |ns, pdb| {
                ns == NAMESPACE && pdb.metadata.name.as_deref() == Some(name.as_str())
            })
            .times(1)
            .returning(|_, _| {
                Err(Error::AlreadyExists {
                    kind: "PodDisruptionBudget".to_string(),
                    name: "x".to_string(),
                })
            });

        let updater = updater_with_budgets(existing, |_| {}, budgets);
        let mut desired = lrp();
        desired.target_instances = 2;
        updater.update(&desired).await.unwrap();
    }

    #[tokio::test]
    async fn budget_creation_error_is_surfaced() {
        let mut budgets = MockPodDisruptionBudgetClient::new();
        budgets
            .expect_create()
            .returning(|_, _| Err(Error::validation("boom")));

        let updater = updater_with_budgets(stored(&lrp()), |_| {}, budgets);
        let err = updater.update(&lrp()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
