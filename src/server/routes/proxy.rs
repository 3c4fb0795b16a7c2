use crate::server::{AppState, routes::ErrorResponse};
use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::Response,
};
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Forwards the remainder of the request path, the query string, the method,
/// headers and body to the Kubernetes API and relays the response back
/// unmodified. Both bodies are streamed, so there is no size limit in either
/// direction and a single attempt is made per request.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    Path(subpath): Path<String>,
    request: Request,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let target = target_url(
        &state.settings.kubernetes_settings.api_url,
        &subpath,
        request.uri().query().unwrap_or_default(),
    )
    .map_err(|err| {
        // Unparsable targets have historically been reported as 404 rather
        // than 400; kept for compatibility with existing clients.
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                message: err.to_string(),
            }),
        )
    })?;

    let (parts, body) = request.into_parts();
    let mut outbound_headers = HeaderMap::with_capacity(parts.headers.len());
    for (name, value) in &parts.headers {
        if *name != header::HOST && !is_hop_by_hop(name) {
            outbound_headers.append(name, value.clone());
        }
    }

    let upstream_response = match state
        .http_client
        .request(parts.method, target)
        .headers(outbound_headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to forward request to the Kubernetes API: {err:?}");
            let status = if err.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            return Err((
                status,
                Json(ErrorResponse {
                    message: err.to_string(),
                }),
            ));
        }
    };

    let status = upstream_response.status();
    let mut relayed_headers = HeaderMap::with_capacity(upstream_response.headers().len());
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop(name) {
            relayed_headers.append(name, value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = relayed_headers;
    Ok(response)
}

/// Join rule for the forwarded URL: `base + "/" + subpath + "?" + query`,
/// with the `?` separator present even when the query is empty.
fn target_url(base: &str, subpath: &str, raw_query: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{subpath}?{raw_query}",
        base.trim_end_matches('/')
    ))
}

/// Headers that apply to a single connection and must not travel through
/// the proxy in either direction.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        DashboardSettings, KubernetesSettings, Settings,
        cluster::ClusterClient,
        http_client::{BuildHttpClientArgs, build_http_client},
    };
    use axum::{Router, routing::any};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{
            body_string, header as header_matcher, method as method_matcher,
            path as path_matcher, query_param,
        },
    };

    fn test_app(api_url: &str) -> Router {
        let http_client = build_http_client(BuildHttpClientArgs {
            allow_invalid_certs: false,
            request_timeout: Duration::from_secs(5),
            bearer_token: None,
            ca_certificate: None,
        })
        .unwrap();
        Router::new()
            .route("/proxy/{*subpath}", any(proxy_handler))
            .with_state(Arc::new(AppState {
                cluster: ClusterClient::new(http_client.clone(), api_url.to_owned()),
                http_client,
                settings: Settings {
                    dashboard_settings: DashboardSettings {
                        install_namespace: "tekton-dashboard".to_owned(),
                        pipelines_namespace: "tekton-pipelines".to_owned(),
                        triggers_namespace: "tekton-triggers".to_owned(),
                        read_only: false,
                        logout_url: None,
                        tenant_namespace: None,
                        stream_logs: false,
                        external_logs_url: None,
                    },
                    kubernetes_settings: KubernetesSettings {
                        api_url: api_url.to_owned(),
                        bearer_token: None,
                        ca_certificate: None,
                        allow_invalid_certs: false,
                        request_timeout: 5,
                    },
                },
            }))
    }

    #[tokio::test]
    async fn forwards_method_headers_query_and_body() {
        let upstream = MockServer::start().await;
        Mock::given(method_matcher("POST"))
            .and(path_matcher(
                "/apis/tekton.dev/v1/namespaces/default/pipelineruns",
            ))
            .and(query_param("limit", "1"))
            .and(header_matcher("x-forwarded-user", "admin"))
            .and(body_string("{\"kind\":\"PipelineRun\"}"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&upstream)
            .await;

        let response = test_app(&upstream.uri())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/proxy/apis/tekton.dev/v1/namespaces/default/pipelineruns?limit=1")
                    .header("x-forwarded-user", "admin")
                    .body(Body::from("{\"kind\":\"PipelineRun\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn relays_upstream_status_headers_and_body() {
        let upstream = MockServer::start().await;
        Mock::given(method_matcher("GET"))
            .and(path_matcher("/apis/apps/v1/deployments"))
            .respond_with(
                ResponseTemplate::new(418)
                    .insert_header("x-relayed", "yes")
                    .set_body_string("short and stout"),
            )
            .mount(&upstream)
            .await;

        let response = test_app(&upstream.uri())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/apis/apps/v1/deployments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-relayed"], "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"short and stout");
    }

    #[tokio::test]
    async fn upstream_error_statuses_are_relayed_after_a_single_attempt() {
        let upstream = MockServer::start().await;
        Mock::given(method_matcher("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
            .expect(1)
            .mount(&upstream)
            .await;

        let response = test_app(&upstream.uri())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/api/v1/pods")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"backend exploded");
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_bad_gateway() {
        let response = test_app("http://127.0.0.1:1")
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/api/v1/pods")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(payload["message"].is_string());
    }

    #[tokio::test]
    async fn unparsable_target_maps_to_not_found() {
        let response = test_app("not a base url")
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/api/v1/pods")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(payload["message"].is_string());
    }

    #[test]
    fn target_url_joins_base_subpath_and_query() {
        let url = target_url("http://backend.example", "api/v1/pods", "watch=true&limit=5").unwrap();
        assert_eq!(
            url.as_str(),
            "http://backend.example/api/v1/pods?watch=true&limit=5"
        );
    }

    #[test]
    fn target_url_appends_the_query_separator_even_when_empty() {
        let url = target_url("http://backend.example/", "apis/apps/v1", "").unwrap();
        assert_eq!(url.as_str(), "http://backend.example/apis/apps/v1?");
    }

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
    }
}
