//! HTTP surface: route table, per-route role gates and the shared layers.

use axum::{
    middleware,
    routing::{delete, get, patch, post, MethodRouter},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::access::{
    authorize, Gate, ADMIN, ANALYST, ANALYST_OR_CUSTOMER, ANY_ROLE, CUSTOMER,
};
use crate::handlers::{self, AppState};
use crate::models::RoleKind;

/// Request size limit: 1MB max payload.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Restricts a method router to callers holding one of `allowed`.
fn gated(
    route: MethodRouter<Arc<AppState>>,
    state: &AppState,
    allowed: &'static [RoleKind],
) -> MethodRouter<Arc<AppState>> {
    route.route_layer(middleware::from_fn_with_state(
        Gate::new(state.keys.clone(), allowed),
        authorize,
    ))
}

/// Builds the complete application router.
pub fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    // Login and refresh are the brute-force targets: 20 burst, one token back every 2s per IP
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let auth_routes = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh-tokens", post(handlers::refresh_tokens))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .route(
            "/auth/logout",
            gated(delete(handlers::logout), &state, ANY_ROLE),
        );

    let account_routes = Router::new()
        .route(
            "/authorized-user",
            gated(get(handlers::authorized_user), &state, ANY_ROLE),
        )
        .route("/customers/create", post(handlers::create_customer))
        .route(
            "/analysts/create",
            gated(post(handlers::create_analyst), &state, ADMIN),
        )
        .route(
            "/admins/create",
            gated(post(handlers::create_admin), &state, ADMIN),
        );

    let company_routes = Router::new()
        .route("/companies", get(handlers::list_companies))
        .route(
            "/companies/create",
            gated(post(handlers::create_company), &state, ADMIN),
        )
        .route("/companies/:id", get(handlers::get_company));

    // Row ownership on these is enforced by the lifecycle, not the gate
    let request_routes = Router::new()
        .route(
            "/requests/create",
            gated(post(handlers::create_request), &state, CUSTOMER),
        )
        .route(
            "/requests",
            gated(get(handlers::list_requests), &state, ANALYST_OR_CUSTOMER),
        )
        .route(
            "/requests/:id",
            gated(
                get(handlers::get_request)
                    .patch(handlers::update_request)
                    .delete(handlers::delete_request),
                &state,
                ANALYST_OR_CUSTOMER,
            ),
        );

    let analysis_routes = Router::new()
        .route("/analyzes", get(handlers::list_analyses))
        .route(
            "/analyzes/:id",
            get(handlers::get_analysis).merge(gated(
                patch(handlers::update_analysis).delete(handlers::delete_analysis),
                &state,
                ANALYST,
            )),
        );

    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let api = Router::new()
        .merge(auth_routes)
        .merge(account_routes)
        .merge(company_routes)
        .merge(request_routes)
        .merge(analysis_routes)
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(TimeoutLayer::new(timeout)),
        );

    // Health check bypasses the gates and the rate limiter
    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
