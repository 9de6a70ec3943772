//! Role gate for protected routes.
//!
//! The gate only answers "is this a valid access token for one of these
//! roles". Row-level ownership (a customer's own request, an analyst's own
//! analysis) is checked by the lifecycle and scoring services.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{TokenKeys, TokenKind};
use crate::errors::AppError;
use crate::models::{Role, RoleKind};

pub const ANY_ROLE: &[RoleKind] = &[RoleKind::Admin, RoleKind::Analyst, RoleKind::Customer];
pub const ADMIN: &[RoleKind] = &[RoleKind::Admin];
pub const ANALYST: &[RoleKind] = &[RoleKind::Analyst];
pub const CUSTOMER: &[RoleKind] = &[RoleKind::Customer];
pub const ANALYST_OR_CUSTOMER: &[RoleKind] = &[RoleKind::Analyst, RoleKind::Customer];

/// The authenticated caller, placed in request extensions by [`authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Decodes the access token in `headers` into a principal.
pub fn authenticate(keys: &TokenKeys, headers: &HeaderMap) -> Result<Principal, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = keys
        .verify(TokenKind::Access, token)
        .map_err(|e| AppError::Unauthorized(format!("Invalid access token: {}", e)))?;
    Ok(Principal {
        user_id: claims.sub,
        role: claims.role,
    })
}

pub fn require_role(principal: &Principal, allowed: &[RoleKind]) -> Result<(), AppError> {
    if allowed.contains(&principal.role.kind()) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} {} does not have sufficient privileges to access this route",
            principal.role.kind(),
            principal.role.id()
        )))
    }
}

/// Middleware state: token keys plus the roles admitted by one route.
#[derive(Clone)]
pub struct Gate {
    keys: Arc<TokenKeys>,
    allowed: &'static [RoleKind],
}

impl Gate {
    pub fn new(keys: Arc<TokenKeys>, allowed: &'static [RoleKind]) -> Self {
        Self { keys, allowed }
    }
}

/// 401 without a valid access token, 403 for a role outside the gate's set.
pub async fn authorize(
    State(gate): State<Gate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = authenticate(&gate.keys, request.headers())?;
    require_role(&principal, gate.allowed)?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn keys() -> TokenKeys {
        TokenKeys::new("gate-access", "gate-refresh", 600, 3_600)
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authenticate_decodes_principal() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let role = Role::Customer(Uuid::new_v4());
        let token = keys.issue(TokenKind::Access, user_id, role).unwrap();

        let principal = authenticate(&keys, &headers_with(&format!("Bearer {}", token))).unwrap();
        assert_eq!(principal, Principal { user_id, role });
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let keys = keys();
        let token = keys
            .issue(TokenKind::Refresh, Uuid::new_v4(), Role::Admin(Uuid::new_v4()))
            .unwrap();

        let err = authenticate(&keys, &headers_with(&format!("Bearer {}", token))).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_require_role() {
        let principal = Principal {
            user_id: Uuid::new_v4(),
            role: Role::Customer(Uuid::new_v4()),
        };
        assert!(require_role(&principal, ANALYST_OR_CUSTOMER).is_ok());
        assert!(matches!(
            require_role(&principal, ANALYST).unwrap_err(),
            AppError::Forbidden(_)
        ));
    }
}
