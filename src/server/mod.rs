//! HTTP server exposing the dashboard backend API.

#[cfg(feature = "rustls-tls")]
#[cfg(feature = "native-tls")]
compile_error!("You can only enable one TLS backend");

mod cluster;
mod http_client;
mod routes;

use anyhow::Result;
use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::{any, get},
};
use cluster::ClusterClient;
use core::{net::SocketAddr, time::Duration};
use http_client::{BuildHttpClientArgs, HttpClient, build_http_client};
use reqwest::header;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{self, TraceLayer},
};
use tracing::{Level, info};

#[derive(Debug)]
pub struct Server {
    router_inner: Router,
}

/// Settings to run the dashboard server with.
#[derive(Debug, Clone)]
pub struct Settings {
    /// See [`DashboardSettings`].
    pub dashboard_settings: DashboardSettings,

    /// See [`KubernetesSettings`].
    pub kubernetes_settings: KubernetesSettings,
}

/// Configuration options describing the dashboard installation itself.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    /// Namespace the dashboard is installed in.
    pub install_namespace: String,

    /// Namespace Tekton Pipelines is installed in.
    pub pipelines_namespace: String,

    /// Namespace Tekton Triggers is installed in, if it is installed at all.
    pub triggers_namespace: String,

    /// Whether the dashboard is running in read-only mode.
    pub read_only: bool,

    /// URL to send clients to when logging out, for deployments that sit
    /// behind an authenticating frontend.
    pub logout_url: Option<String>,

    /// Tenant namespace the dashboard is restricted to, if any.
    pub tenant_namespace: Option<String>,

    /// Whether logs are streamed to clients instead of served as complete documents.
    pub stream_logs: bool,

    /// URL of an external log provider, if one is configured.
    ///
    /// Clients are never given this value directly, only told that a
    /// provider exists.
    pub external_logs_url: Option<String>,
}

/// Configuration options used when talking to the Kubernetes API, both for
/// proxied requests and for the dashboard's own cluster lookups.
#[derive(Debug, Clone)]
pub struct KubernetesSettings {
    /// Base URL of the Kubernetes API server.
    pub api_url: String,

    /// Bearer token to authenticate to the Kubernetes API with.
    pub bearer_token: Option<String>,

    /// Additional PEM-encoded root certificate to trust, usually the cluster CA.
    pub ca_certificate: Option<Vec<u8>>,

    /// Whether to allow invalid/expired/forged TLS certificates when talking
    /// to the Kubernetes API.
    ///
    /// **Enabling this is dangerous and is usually not necessary.**
    pub allow_invalid_certs: bool,

    /// How many seconds that can elapse after sending a request to the
    /// Kubernetes API before it's abandoned and considered failed.
    pub request_timeout: u64,
}

#[derive(Debug)]
struct AppState {
    http_client: HttpClient,
    cluster: ClusterClient,
    settings: Settings,
}

impl Server {
    /// Create a new server with the provided settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let http_client = build_http_client(BuildHttpClientArgs {
            allow_invalid_certs: settings.kubernetes_settings.allow_invalid_certs,
            request_timeout: Duration::from_secs(settings.kubernetes_settings.request_timeout),
            bearer_token: settings.kubernetes_settings.bearer_token.clone(),
            ca_certificate: settings.kubernetes_settings.ca_certificate.clone(),
        })?;
        let router = Router::new()
            .route("/health", get(routes::health_handler))
            .route("/v1/properties", get(routes::properties_handler))
            .route("/proxy/{*subpath}", any(routes::proxy_handler))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CatchPanicLayer::new())
            .layer(axum_middleware::from_fn(Self::header_middleware))
            .with_state(Arc::new(AppState {
                cluster: ClusterClient::new(
                    http_client.clone(),
                    settings.kubernetes_settings.api_url.clone(),
                ),
                http_client,
                settings,
            }));

        Ok(Self {
            router_inner: router,
        })
    }

    /// Start the server and expose it locally on the provided [`SocketAddr`].
    pub async fn start(self, address: &SocketAddr) -> Result<()> {
        let tcp_listener = TcpListener::bind(&address).await?;
        info!("Listening on http://{}", tcp_listener.local_addr()?);
        axum::serve(tcp_listener, self.router_inner)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await?;
        Ok(())
    }

    // https://github.com/tokio-rs/axum/blob/15917c6dbcb4a48707a20e9cfd021992a279a662/examples/graceful-shutdown/src/main.rs#L55
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    async fn header_middleware(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().append(
            header::SERVER,
            HeaderValue::from_static(env!("CARGO_PKG_NAME")),
        );
        response
    }
}
