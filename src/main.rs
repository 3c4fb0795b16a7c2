mod server;

use anyhow::{Context, Result};
use clap::Parser;
use core::net::SocketAddr;
use dotenvy::dotenv;
use server::{DashboardSettings, KubernetesSettings, Server, Settings};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about)]
struct Arguments {
    /// Internet socket address that the server should be ran on.
    #[arg(
        long = "address",
        env = "DASHBOARD_ADDRESS",
        default_value = "127.0.0.1:9097"
    )]
    address: SocketAddr,

    /// Base URL of the Kubernetes API server that proxied requests and
    /// cluster lookups are sent to.
    #[arg(
        long = "kubernetes-api-url",
        env = "DASHBOARD_KUBERNETES_API_URL",
        default_value = "https://kubernetes.default.svc"
    )]
    kubernetes_api_url: String,

    /// File containing the bearer token to authenticate to the Kubernetes API
    /// with, usually a mounted service account token.
    #[arg(
        long = "kubernetes-bearer-token-file",
        env = "DASHBOARD_KUBERNETES_BEARER_TOKEN_FILE"
    )]
    kubernetes_bearer_token_file: Option<PathBuf>,

    /// File containing an additional PEM-encoded root certificate to trust
    /// when talking to the Kubernetes API, usually the cluster CA.
    #[arg(long = "kubernetes-ca-file", env = "DASHBOARD_KUBERNETES_CA_FILE")]
    kubernetes_ca_file: Option<PathBuf>,

    /// Allow invalid TLS certificates when talking to the Kubernetes API (DANGEROUS).
    #[arg(
        long = "kubernetes-allow-invalid-certs",
        env = "DASHBOARD_KUBERNETES_ALLOW_INVALID_CERTS",
        default_value_t = false
    )]
    kubernetes_allow_invalid_certs: bool,

    /// Maximum waiting time (in seconds) before requests to the Kubernetes API
    /// are aborted. Applies to proxied requests and cluster lookups alike.
    #[arg(
        long = "kubernetes-request-timeout",
        env = "DASHBOARD_KUBERNETES_REQUEST_TIMEOUT",
        default_value_t = 30
    )]
    kubernetes_request_timeout: u64,

    /// Namespace the dashboard itself is installed in.
    #[arg(
        long = "install-namespace",
        env = "DASHBOARD_INSTALL_NAMESPACE",
        default_value = "tekton-dashboard"
    )]
    install_namespace: String,

    /// Namespace Tekton Pipelines is installed in.
    #[arg(
        long = "pipelines-namespace",
        env = "DASHBOARD_PIPELINES_NAMESPACE",
        default_value = "tekton-pipelines"
    )]
    pipelines_namespace: String,

    /// Namespace Tekton Triggers is installed in, if it is installed at all.
    #[arg(
        long = "triggers-namespace",
        env = "DASHBOARD_TRIGGERS_NAMESPACE",
        default_value = "tekton-triggers"
    )]
    triggers_namespace: String,

    /// Run the dashboard in read-only mode.
    #[arg(long = "read-only", env = "DASHBOARD_READ_ONLY", default_value_t = false)]
    read_only: bool,

    /// URL to send clients to when logging out, for deployments that sit
    /// behind an authenticating frontend.
    #[arg(long = "logout-url", env = "DASHBOARD_LOGOUT_URL")]
    logout_url: Option<String>,

    /// Restrict the dashboard to resources in a single tenant namespace.
    #[arg(long = "tenant-namespace", env = "DASHBOARD_TENANT_NAMESPACE")]
    tenant_namespace: Option<String>,

    /// Stream logs to clients instead of serving them as complete documents.
    #[arg(
        long = "stream-logs",
        env = "DASHBOARD_STREAM_LOGS",
        default_value_t = false
    )]
    stream_logs: bool,

    /// URL of an external log provider holding logs that have been rotated
    /// out of the cluster. Clients are never given this value directly, only
    /// told that a provider exists.
    #[arg(long = "external-logs-url", env = "DASHBOARD_EXTERNAL_LOGS_URL")]
    external_logs_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info")))
        .init();
    let args = Arguments::parse();

    if args.kubernetes_allow_invalid_certs {
        println!(
            "WARNING: Running with 'kubernetes_allow_invalid_certs' will allow a Kubernetes API with Invalid/Forged/No TLS certificates to be used, be careful."
        );
    }

    let bearer_token = args
        .kubernetes_bearer_token_file
        .map(|path| {
            fs::read_to_string(&path)
                .with_context(|| format!("failed to read bearer token from {}", path.display()))
        })
        .transpose()?
        .map(|token| token.trim().to_owned());
    let ca_certificate = args
        .kubernetes_ca_file
        .map(|path| {
            fs::read(&path)
                .with_context(|| format!("failed to read CA certificate from {}", path.display()))
        })
        .transpose()?;

    Server::new(Settings {
        dashboard_settings: DashboardSettings {
            install_namespace: args.install_namespace,
            pipelines_namespace: args.pipelines_namespace,
            triggers_namespace: args.triggers_namespace,
            read_only: args.read_only,
            logout_url: args.logout_url,
            tenant_namespace: args.tenant_namespace,
            stream_logs: args.stream_logs,
            external_logs_url: args.external_logs_url,
        },
        kubernetes_settings: KubernetesSettings {
            api_url: args.kubernetes_api_url,
            bearer_token,
            ca_certificate,
            allow_invalid_certs: args.kubernetes_allow_invalid_certs,
            request_timeout: args.kubernetes_request_timeout,
        },
    })?
    .start(&args.address)
    .await
}
