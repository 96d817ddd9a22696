use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use crate::audit::{AuditContext, Operator, RequestContext};
use crate::auth::{client_ip, jwt};
use crate::error::AppError;
use crate::state::SharedState;

/// An authenticated caller. Rejects the request when no valid token is present.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub operator: Operator,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.operator.user_id
    }
}

fn bearer_or_cookie(parts: &Parts) -> Result<Option<String>, AppError> {
    // Try Bearer token from Authorization header first
    if let Some(auth_header) = parts.headers.get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid authorization header".to_string()))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(Some(token.to_string()));
        }
    }

    // Try cookie-based auth
    let jar = CookieJar::from_headers(&parts.headers);
    Ok(jar.get("access_token").map(|cookie| cookie.value().to_string()))
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_or_cookie(parts)?
            .ok_or_else(|| AppError::Unauthorized("Missing authentication token".to_string()))?;

        let claims = jwt::decode_token(&token, &state.config.jwt_secret)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

        Ok(AuthUser {
            operator: claims.operator(),
        })
    }
}

/// Operator and client address for the capture step. Never rejects: a
/// missing or invalid token leaves the operator absent.
impl FromRequestParts<SharedState> for AuditContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let operator = match bearer_or_cookie(parts) {
            Ok(Some(token)) => match jwt::decode_token(&token, &state.config.jwt_secret) {
                Ok(claims) => Some(claims.operator()),
                Err(e) => {
                    tracing::warn!("Ignoring invalid token for audit context: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Ignoring malformed credentials for audit context: {e}");
                None
            }
        };

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let request = RequestContext {
            client_ip: client_ip::resolve(&parts.headers, peer, &state.config.trusted_proxies),
        };

        Ok(AuditContext::new(operator, Some(request)))
    }
}
