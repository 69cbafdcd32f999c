//! JSON transcoding from `POST /v1/<wire_name>` into the service core.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use simplebank_core::{Code, Method, RpcStatus, WireFormat};
use tracing::warn;

use super::GatewayState;
use crate::api::{dispatch, CallContext};

const APPLICATION_JSON: &str = "application/json";

/// HTTP status returned for a call that failed with `code`.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders `status` as the gateway's JSON error body.
#[must_use]
pub fn error_response(status: &RpcStatus) -> Response {
    let body = serde_json::to_vec(status).unwrap_or_else(|_| b"{}".to_vec());
    (
        http_status(status.code),
        [(CONTENT_TYPE, APPLICATION_JSON)],
        body,
    )
        .into_response()
}

/// Copies request headers into call metadata. Header names are already
/// lower-case; values that are not visible ASCII are dropped.
fn metadata_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Handles one transcoded call of `method`.
pub async fn transcode(
    State(state): State<GatewayState>,
    method: Method,
    request: Request,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = request.into_parts();
    let ctx = CallContext::new(metadata_from_headers(&parts.headers), client_ip);

    let body = match axum::body::to_bytes(body, state.max_body_length).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(&RpcStatus::new(
                Code::InvalidArgument,
                format!("cannot read request body: {err}"),
            ))
        }
    };

    match dispatch(&state.core, method, &ctx, &body, WireFormat::Json).await {
        Ok(payload) => (StatusCode::OK, [(CONTENT_TYPE, APPLICATION_JSON)], payload).into_response(),
        Err(status) => {
            warn!(
                method = method.name(),
                code = %status.code,
                message = %status.message,
                "gateway call failed"
            );
            error_response(&status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_maps_to_an_http_status() {
        let cases = [
            (Code::InvalidArgument, 400),
            (Code::Unauthenticated, 401),
            (Code::PermissionDenied, 403),
            (Code::NotFound, 404),
            (Code::AlreadyExists, 409),
            (Code::FailedPrecondition, 412),
            (Code::Internal, 500),
            (Code::Unimplemented, 501),
        ];
        for (code, http) in cases {
            assert_eq!(http_status(code).as_u16(), http, "{code}");
        }
    }

    #[test]
    fn metadata_keeps_ascii_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().expect("value"));
        headers.insert("x-binary", axum::http::HeaderValue::from_bytes(&[0xff]).expect("value"));
        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.get("authorization").map(String::as_str), Some("Bearer abc"));
        assert!(!metadata.contains_key("x-binary"));
    }
}
