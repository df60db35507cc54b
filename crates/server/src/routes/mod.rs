//! API route handlers.

use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tender_stream_shared::ProblemDetails;

pub mod events;

/// Error response rendered as `application/problem+json`.
#[derive(Debug, Clone)]
pub struct ApiProblem(pub ProblemDetails);

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}
