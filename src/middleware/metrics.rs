//! Metrics policy: in-flight gauge, size histograms, duration histogram,
//! per-status counter and the typed error counter for failed requests.

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use hyper::body::Body as _;

use crate::metrics::{
    RequestTimer, decrement_in_flight, error_type_for_status, increment_error_total,
    increment_in_flight, increment_request_total, record_sizes,
};

pub async fn track_metrics(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    let request_size = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| req.body().size_hint().exact())
        .unwrap_or(0);

    increment_in_flight();
    let timer = RequestTimer::new(&path, &method);

    let response = next.run(req).await;

    decrement_in_flight();
    drop(timer);

    let status = response.status().as_u16();
    increment_request_total(&path, &method, status);

    let response_size = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0);
    record_sizes(&path, &method, request_size, response_size);

    if status >= 400 {
        increment_error_total(&path, &method, &error_type_for_status(status));
    }

    response
}
