//! # Request Authentication
//!
//! `Authenticated` is an actix extractor: adding it to a handler's
//! arguments makes the route require a valid bearer token. A missing or
//! rejected token is audited as an anonymous `AUTHENTICATE` failure and
//! the handler never runs.
//!
//! ```text
//! Authorization: Bearer <token>
//!        │
//!        ▼
//!   TokenService::validate ──► Ok(Claims) ──► handler
//!        │
//!        └── Err ──► audit FAILURE ──► 401 envelope
//! ```

use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::http::{header, StatusCode};
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use futures::future::LocalBoxFuture;

use crate::db::{AuditOutcome, NewAuditEntry};
use crate::models::ApiResponse;
use crate::services::{AuthFailure, Caller, Claims, ServiceError};
use crate::AppState;

/// Actor name recorded when no identity could be established.
pub const ANONYMOUS: &str = "anonymous";

/// Claims of an authenticated caller.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

impl Authenticated {
    pub fn claims(&self) -> &Claims {
        &self.0
    }

    pub fn caller(&self) -> Caller {
        Caller::User(self.0.clone())
    }
}

impl FromRequest for Authenticated {
    type Error = ServiceError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<Arc<AppState>>>().cloned();
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().map(str::to_owned));

        Box::pin(async move {
            let state = state.ok_or_else(|| {
                ServiceError::Configuration("application state not registered".into())
            })?;
            let header = match header {
                None => None,
                Some(Ok(value)) => Some(value),
                Some(Err(_)) => Some(String::new()),
            };
            authenticate(&state, header.as_deref()).await
        })
    }
}

/// Validate an `Authorization` header value, auditing any failure.
pub async fn authenticate(state: &AppState, header: Option<&str>) -> Result<Authenticated, ServiceError> {
    let outcome = bearer_token(header)
        .and_then(|token| state.tokens.validate(token).map_err(ServiceError::from));

    match outcome {
        Ok(claims) => Ok(Authenticated(claims)),
        Err(e) => {
            state
                .audit
                .record(
                    NewAuditEntry::new(None, ANONYMOUS, "AUTHENTICATE", "AUTH", AuditOutcome::Failure)
                        .with_error(e.to_string()),
                )
                .await;
            Err(e)
        }
    }
}

fn bearer_token(header: Option<&str>) -> Result<&str, ServiceError> {
    let header = header.ok_or(ServiceError::Authentication(AuthFailure::AuthenticationRequired))?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(ServiceError::Authentication(AuthFailure::InvalidToken))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ServiceError::Authentication(AuthFailure::InvalidToken));
    }
    Ok(token.trim())
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Authorization { .. } => StatusCode::FORBIDDEN,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::TargetSystem(_) | ServiceError::Persistence(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(ApiResponse::<()>::error(self.code(), &self.to_string()))
    }
}
