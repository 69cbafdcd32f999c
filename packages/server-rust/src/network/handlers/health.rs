//! Liveness endpoint for orchestrators and load balancers.

use axum::http::StatusCode;

/// Liveness probe: always 200 OK while the process is serving. Never touches the store.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_handler_always_returns_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }
}
