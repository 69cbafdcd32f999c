//! HTTP middleware stack for the gateway.
//!
//! Layers are listed outermost first: the first layer sees the request first
//! on the way in and the response last on the way out.

use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::GatewayOptions;

const X_REQUEST_ID: &str = "x-request-id";

/// The composed layer type produced by [`build_http_layers`].
pub type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<
                CompressionLayer,
                Stack<
                    TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
                    Stack<
                        RequestBodyLimitLayer,
                        Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the gateway's middleware stack.
///
/// 1. `SetRequestId` assigns an `x-request-id` to requests that lack one
/// 2. `RequestBodyLimit` rejects bodies over `max_body_length` with 413
/// 3. `Trace` opens a span per request
/// 4. `Compression` gzips responses the client accepts gzip for
/// 5. `Cors` answers preflight requests for the configured origins
/// 6. `Timeout` answers 408 when a call exceeds `request_timeout`
/// 7. `PropagateRequestId` echoes `x-request-id` on the response
///
/// `Timeout` needs a `Default` response body, so it must stay inside the body
/// limit, whose response body has none.
///
/// Authentication is not a layer: it runs inside the service core so the RPC
/// listener and the gateway enforce it identically.
#[must_use]
pub fn build_http_layers(options: &GatewayOptions) -> HttpLayers {
    let request_id = HeaderName::from_static(X_REQUEST_ID);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(options.max_body_length))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&options.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id))
        .into_inner()
}

/// A `"*"` entry allows any origin; otherwise only the parseable entries.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, USER_AGENT])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::{
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
    };
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    fn echo_router(options: &GatewayOptions) -> Router {
        Router::new()
            .route("/echo", post(|body: axum::body::Bytes| async move { body }))
            .layer(build_http_layers(options))
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let response = echo_router(&GatewayOptions::default())
            .oneshot(
                Request::post("/echo")
                    .body(Body::from("hi"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let options = GatewayOptions {
            max_body_length: 4,
            request_timeout: Duration::from_secs(5),
            ..GatewayOptions::default()
        };
        let response = echo_router(&options)
            .oneshot(
                Request::post("/echo")
                    .body(Body::from("too large"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/echo")
            .header(ORIGIN, origin)
            .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn cors_allows_only_listed_origins() {
        let options = GatewayOptions {
            cors_origins: vec![
                "http://localhost:8080".to_string(),
                "https://bank.example.com".to_string(),
            ],
            ..GatewayOptions::default()
        };

        let allowed = echo_router(&options)
            .oneshot(preflight("https://bank.example.com"))
            .await
            .expect("response");
        assert_eq!(
            allowed.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).expect("allow-origin"),
            "https://bank.example.com"
        );

        let denied = echo_router(&options)
            .oneshot(preflight("https://evil.example.com"))
            .await
            .expect("response");
        assert!(denied.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn cors_wildcard_allows_any_origin() {
        let response = echo_router(&GatewayOptions::default())
            .oneshot(preflight("https://anywhere.example.com"))
            .await
            .expect("response");
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).expect("allow-origin"),
            "*"
        );
    }
}
