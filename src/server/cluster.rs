use crate::server::http_client::HttpClient;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

const DASHBOARD_SELECTOR: &str =
    "app.kubernetes.io/part-of=tekton-dashboard,app.kubernetes.io/component=dashboard";
const PIPELINES_SELECTOR: &str =
    "app.kubernetes.io/part-of=tekton-pipelines,app.kubernetes.io/component=controller";
const TRIGGERS_SELECTOR: &str =
    "app.kubernetes.io/part-of=tekton-triggers,app.kubernetes.io/component=controller";

const VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Read-only lookups against the Kubernetes API for discovering what is
/// installed in the cluster and at which version.
///
/// Lookups never fail the caller: anything that goes wrong is logged and
/// reported as "unknown version" or "not installed".
#[derive(Debug, Clone)]
pub struct ClusterClient {
    client: HttpClient,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(default)]
    metadata: ObjectMeta,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    labels: HashMap<String, String>,
}

impl ClusterClient {
    pub fn new(client: HttpClient, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Version of the dashboard installed in `namespace`, or an empty string
    /// when it cannot be determined.
    pub async fn dashboard_version(&self, namespace: &str) -> String {
        self.component_version(namespace, DASHBOARD_SELECTOR).await
    }

    /// Version of Tekton Pipelines installed in `namespace`, or an empty
    /// string when it cannot be determined.
    pub async fn pipelines_version(&self, namespace: &str) -> String {
        self.component_version(namespace, PIPELINES_SELECTOR).await
    }

    /// Version of Tekton Triggers installed in `namespace`, or an empty
    /// string when it cannot be determined.
    pub async fn triggers_version(&self, namespace: &str) -> String {
        self.component_version(namespace, TRIGGERS_SELECTOR).await
    }

    /// Whether Tekton Triggers is installed in `namespace`, decided by the
    /// presence of its controller deployment. Lookup failures are reported
    /// as not installed.
    pub async fn is_triggers_installed(&self, namespace: &str) -> bool {
        match self.deployments(namespace, TRIGGERS_SELECTOR).await {
            Ok(list) => !list.items.is_empty(),
            Err(err) => {
                warn!("Failed to check for Tekton Triggers in '{namespace}': {err:?}");
                false
            }
        }
    }

    async fn component_version(&self, namespace: &str, label_selector: &str) -> String {
        let list = match self.deployments(namespace, label_selector).await {
            Ok(list) => list,
            Err(err) => {
                warn!("Failed to look up a component version in '{namespace}': {err:?}");
                return String::new();
            }
        };
        list.items
            .into_iter()
            .next()
            .and_then(|deployment| deployment.metadata.labels.get(VERSION_LABEL).cloned())
            .unwrap_or_default()
    }

    async fn deployments(&self, namespace: &str, label_selector: &str) -> Result<DeploymentList> {
        let url = format!(
            "{}/apis/apps/v1/namespaces/{namespace}/deployments",
            self.api_url.trim_end_matches('/')
        );
        Ok(self
            .client
            .get(url)
            .query(&[("labelSelector", label_selector)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
