//! Service info and liveness endpoints.

use axum::Json;

use crate::models::{HealthResponse, ServiceInfoResponse};

/// `GET /`: service name, version and mounted route groups.
pub async fn service_info() -> Json<ServiceInfoResponse> {
    Json(ServiceInfoResponse {
        message: "Bookly API is running".into(),
        version: bookly_core::version().into(),
        endpoints: vec!["/api/v1/auth".into()],
    })
}

/// `GET /health`: liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
    })
}
