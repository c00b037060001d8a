use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use stratus_common::clients::{PodDisruptionBudgetClient, SecretsClient, WorkloadClient};
use stratus_common::model::Lrp;
use stratus_common::Result;
use stratus_workload::{apply_options, private_registry_secret, DesireOption, LrpConverter};
use tracing::{debug, info, instrument};

use crate::sync_disruption_budget;

/// Creates StatefulSets for LRPs
pub struct Desirer {
    workloads: Arc<dyn WorkloadClient>,
    secrets: Arc<dyn SecretsClient>,
    converter: Arc<dyn LrpConverter>,
    budgets: Arc<dyn PodDisruptionBudgetClient>,
}

impl Desirer {
    /// Create a desirer
    pub fn new(
        workloads: Arc<dyn WorkloadClient>,
        secrets: Arc<dyn SecretsClient>,
        converter: Arc<dyn LrpConverter>,
        budgets: Arc<dyn PodDisruptionBudgetClient>,
    ) -> Self {
        Self {
            workloads,
            secrets,
            converter,
            budgets,
        }
    }

    /// Create the StatefulSet for `lrp` in `namespace`
    ///
    /// A private registry's pull secret is created first; if that fails the
    /// StatefulSet is never submitted. An existing StatefulSet is reported as
    /// [`stratus_common::Error::AlreadyExists`]. Once the StatefulSet exists,
    /// a multi-instance LRP also gets its PodDisruptionBudget.
    #[instrument(skip(self, lrp, options), fields(guid = %lrp.id.guid, version = %lrp.id.version))]
    pub async fn desire(
        &self,
        namespace: &str,
        lrp: &Lrp,
        options: &[DesireOption<StatefulSet>],
    ) -> Result<StatefulSet> {
        if let Some(secret) = private_registry_secret(namespace, lrp)? {
            debug!("creating private registry secret");
            self.secrets.create(namespace, &secret).await?;
        }

        let mut statefulset = self.converter.convert(lrp)?;
        apply_options(&mut statefulset, options)?;
        statefulset.metadata.namespace = Some(namespace.to_string());

        let created = self.workloads.create(namespace, &statefulset).await?;
        let name = created.metadata.name.clone().unwrap_or_default();
        sync_disruption_budget(self.budgets.as_ref(), namespace, &name, lrp).await?;
        info!(statefulset = %name, "desired lrp");
        Ok(created)
    }
}
