//! Request metrics for every route, `/metrics` and `/ws` included.
//!
//! Requests are labelled by method, route and status. Organization names and
//! run ids are folded into `{org}` and `{id}` so one tenant's traffic does not
//! mint new series.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Label values recorded for one request.
struct RouteLabels {
    method: String,
    route: String,
}

impl RouteLabels {
    fn of(request: &Request<Body>) -> Self {
        Self {
            method: request.method().as_str().to_string(),
            route: normalize_path(request.uri().path()),
        }
    }

    fn record(&self, status: u16, started: Instant) {
        let status = status.to_string();
        let labels = [self.method.as_str(), self.route.as_str(), status.as_str()];
        HTTP_REQUEST_DURATION
            .with_label_values(&labels)
            .observe(started.elapsed().as_secs_f64());
        HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();
    }
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let labels = RouteLabels::of(&request);
    let started = Instant::now();

    HTTP_REQUESTS_IN_FLIGHT.inc();
    let response = next.run(request).await;
    HTTP_REQUESTS_IN_FLIGHT.dec();

    labels.record(response.status().as_u16(), started);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_org_and_run_id_are_folded_into_route_label() {
        let router = Router::new()
            .route(
                "/api/v1/orgs/{org}/runs/{id}",
                get(|| async { StatusCode::NOT_FOUND }),
            )
            .layer(middleware::from_fn(metrics_middleware));

        let uri = "/api/v1/orgs/initech/runs/6f1c9a52-3b8e-4d7a-9c2e-1f0a5b6d7e8f";
        let labels = ["GET", "/api/v1/orgs/{org}/runs/{id}", "404"];
        let before = HTTP_REQUESTS_TOTAL.with_label_values(&labels).get();

        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HTTP_REQUESTS_TOTAL.with_label_values(&labels).get(),
            before + 1
        );
    }
}
