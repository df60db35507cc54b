//! Static bearer token check.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tender_stream_shared::ProblemDetails;

use crate::routes::ApiProblem;
use crate::state::AppState;

/// Proof that the request carried the configured bearer token. Always
/// succeeds when the server runs without a token.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl<S> FromRequestParts<S> for Authorized
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiProblem;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some(expected) = app_state.config.token.as_deref() else {
            return Ok(Authorized);
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => Ok(Authorized),
            Some(_) => {
                tracing::warn!("rejected {} with wrong bearer token", parts.uri.path());
                Err(ApiProblem(
                    ProblemDetails::unauthorized("invalid bearer token")
                        .with_instance(parts.uri.path()),
                ))
            }
            None => Err(ApiProblem(
                ProblemDetails::unauthorized("missing bearer token")
                    .with_instance(parts.uri.path()),
            )),
        }
    }
}
