use anyhow::Result;
use reqwest::{
    Certificate,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
    redirect::Policy,
};
use std::time::Duration;

pub type HttpClient = reqwest::Client;

pub struct BuildHttpClientArgs {
    pub allow_invalid_certs: bool,
    pub request_timeout: Duration,
    pub bearer_token: Option<String>,
    pub ca_certificate: Option<Vec<u8>>,
}

/// Create a new [`HttpClient`] with the given arguments.
///
/// Redirects are never followed so that they can be relayed to clients as-is.
pub fn build_http_client(args: BuildHttpClientArgs) -> Result<HttpClient> {
    let mut builder = reqwest::ClientBuilder::default()
        .redirect(Policy::none())
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .danger_accept_invalid_certs(args.allow_invalid_certs)
        .connect_timeout(Duration::from_secs(5))
        .timeout(args.request_timeout);
    if let Some(token) = args.bearer_token {
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        auth_value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_value);
        builder = builder.default_headers(headers);
    }
    if let Some(pem) = args.ca_certificate {
        builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}
