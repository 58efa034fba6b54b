//! Outbound HTTP client adapter using Hyper with Rustls (HTTP/1.1 + ALPN h2).
//!
//! Responsibilities:
//! * Streams request and response bodies without buffering
//! * Forces the request version to HTTP/1.1 while ALPN may negotiate h2
//! * Classifies transport failures (refused, DNS, other) for the engine
//!
//! This adapter is intentionally minimal; timeouts and circuit breaking are
//! the proxy engine's concern.

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self { client })
    }

    /// Walk an error's source chain and classify it for the proxy engine.
    fn classify(err: &(dyn std::error::Error + 'static)) -> HttpClientError {
        let top_message = err.to_string();

        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(current) = source {
            if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
                if io_err.kind() == std::io::ErrorKind::ConnectionRefused {
                    return HttpClientError::ConnectionRefused(io_err.to_string());
                }
            }

            let message = current.to_string();
            if message.contains("failed to lookup address")
                || message.contains("dns error")
                || message.contains("Name or service not known")
            {
                return HttpClientError::HostNotFound(message);
            }

            source = current.source();
        }

        HttpClientError::Transport(top_message)
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new().expect("Failed to create HTTP client")
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        // Set Host from the URI when the caller did not pin it already.
        if !parts.headers.contains_key(header::HOST) {
            if let Some(authority) = parts.uri.authority() {
                if let Ok(value) = header::HeaderValue::from_str(authority.as_str()) {
                    parts.headers.insert(header::HOST, value);
                }
            }
        }

        let outgoing = Request::from_parts(parts, body);

        let method = outgoing.method().clone();
        let uri = outgoing.uri().clone();

        match self.client.request(outgoing).await {
            Ok(response) => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    %method,
                    %uri,
                    "upstream responded"
                );

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed as it is streamed back through the
                // server, so the upstream's framing header must not survive.
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(err) => {
                let classified = Self::classify(&err);
                tracing::warn!(error = %classified, %method, %uri, "upstream request failed");
                Err(classified)
            }
        }
    }
}
