use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for outbound HTTP operations.
///
/// The variants are deliberately coarse: the proxy engine maps each one onto
/// a client-visible status code and a typed error counter, so the adapter is
/// responsible for classifying transport failures as precisely as it can.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The upstream did not answer within the request deadline.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream actively refused the connection.
    #[error("connection refused by upstream: {0}")]
    ConnectionRefused(String),

    /// The upstream host name could not be resolved.
    #[error("upstream host not found: {0}")]
    HostNotFound(String),

    /// The outbound request could not be constructed.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    /// Any other transport-level failure.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Result type alias for outbound HTTP operations.
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port for making HTTP requests to upstream services.
///
/// Implementations must stream both request and response bodies; buffering a
/// body end-to-end would defeat the proxy.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a fully rewritten request to the upstream and return its
    /// response with the body still streaming.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
