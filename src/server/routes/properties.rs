use crate::server::AppState;
use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

/// Path clients are sent to for logs held by an external provider. The
/// configured provider URL itself is never exposed.
pub const EXTERNAL_LOGS_PROXY_PATH: &str = "/v1/logs-proxy";

/// Description of the dashboard installation and the Tekton components
/// discovered alongside it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Properties {
    pub dashboard_namespace: String,
    pub dashboard_version: String,
    pub pipeline_namespace: String,
    pub pipeline_version: String,
    #[serde(flatten)]
    pub triggers: Option<TriggersProperties>,
    pub read_only: bool,
    #[serde(rename = "LogoutURL", skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_namespace: Option<String>,
    pub stream_logs: bool,
    #[serde(rename = "ExternalLogsURL", skip_serializing_if = "Option::is_none")]
    pub external_logs_url: Option<String>,
}

/// Reported only when Tekton Triggers is detected. The namespace and version
/// always appear together.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TriggersProperties {
    pub triggers_namespace: String,
    pub triggers_version: String,
}

/// Probes the cluster for the installed Tekton components and combines the
/// results with the dashboard's own configuration. Lookups that fail leave
/// their fields empty or absent; this handler always returns a record.
pub async fn properties_handler(State(state): State<Arc<AppState>>) -> Json<Properties> {
    let dashboard = &state.settings.dashboard_settings;
    let pipelines_namespace = dashboard.pipelines_namespace.clone();
    let triggers_namespace = dashboard.triggers_namespace.clone();

    let dashboard_version = state
        .cluster
        .dashboard_version(&dashboard.install_namespace)
        .await;
    let pipeline_version = state.cluster.pipelines_version(&pipelines_namespace).await;

    let mut properties = Properties {
        dashboard_namespace: dashboard.install_namespace.clone(),
        dashboard_version,
        pipeline_namespace: pipelines_namespace,
        pipeline_version,
        triggers: None,
        read_only: dashboard.read_only,
        logout_url: dashboard.logout_url.clone(),
        tenant_namespace: dashboard.tenant_namespace.clone(),
        stream_logs: dashboard.stream_logs,
        external_logs_url: dashboard
            .external_logs_url
            .as_ref()
            .map(|_| EXTERNAL_LOGS_PROXY_PATH.to_owned()),
    };

    if state
        .cluster
        .is_triggers_installed(&triggers_namespace)
        .await
    {
        properties.triggers = Some(TriggersProperties {
            triggers_version: state.cluster.triggers_version(&triggers_namespace).await,
            triggers_namespace,
        });
    }

    Json(properties)
}
