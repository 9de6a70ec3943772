use crate::access::Principal;
use crate::accounts::{parse_company, AccountService, Registration};
use crate::assignment::AnalystPicker;
use crate::auth::{AuthService, TokenKeys};
use crate::config::Config;
use crate::errors::AppError;
use crate::lifecycle::RequestLifecycle;
use crate::models::*;
use crate::pagination::{Page, PageQuery};
use crate::scoring::{ScoreUpdate, ScoringEngine};
use crate::store::Store;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Token signing material, shared with the route gates.
    pub keys: Arc<TokenKeys>,
    pub auth: AuthService,
    pub accounts: AccountService,
    pub lifecycle: RequestLifecycle,
    pub scoring: ScoringEngine,
}

impl AppState {
    /// Wires every service over one store. `ASSIGNMENT_SEED` makes analyst
    /// assignment reproducible.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let keys = Arc::new(TokenKeys::from_config(&config));
        let picker = Arc::new(match config.assignment_seed {
            Some(seed) => AnalystPicker::seeded(store.clone(), seed),
            None => AnalystPicker::new(store.clone()),
        });

        Self {
            auth: AuthService::new(store.clone(), keys.clone()),
            accounts: AccountService::new(store.clone()),
            lifecycle: RequestLifecycle::new(store.clone(), picker),
            scoring: ScoringEngine::new(store),
            keys,
            config,
        }
    }
}

/// JSON body extractor whose rejections render as `AppError::BadRequest`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query-string extractor with the same JSON error shape as `AppJson`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Path ids that are not UUIDs cannot name an existing row.
fn parse_id(raw: &str, entity: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("{} not found", entity)))
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-analysis-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Session ============

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<LoginPayload>,
) -> Result<Json<TokenPair>, AppError> {
    let credentials = payload.user.unwrap_or_default();
    let (Some(email), Some(password)) = (credentials.email, credentials.password) else {
        return Err(AppError::BadRequest(
            "To login is necessary to send email and password".to_string(),
        ));
    };

    let pair = state.auth.authenticate(&email, &password).await?;
    Ok(Json(pair))
}

/// POST /auth/refresh-tokens
pub async fn refresh_tokens(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<RefreshPayload>,
) -> Result<Json<TokenPair>, AppError> {
    let token = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

    let pair = state.auth.refresh(token.trim()).await?;
    Ok(Json(pair))
}

/// DELETE /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    state.auth.logout(principal.user_id).await?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

/// GET /authorized-user
///
/// The body is keyed by the caller's role, e.g. `{"analyst": {...}}`.
pub async fn authorized_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let view = state.accounts.describe(principal.user_id).await?;
    let key = view.role.as_db_str();
    Ok(Json(json!({ key: view })))
}

// ============ Profiles ============

async fn register_profile(
    state: &AppState,
    kind: RoleKind,
    fields: Option<ProfileFields>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let key = kind.as_db_str();
    let fields = fields.ok_or_else(|| {
        AppError::BadRequest(format!("Request body must contain a '{}' object", key))
    })?;

    let registration = Registration::parse(kind, fields)?;
    let account = state.accounts.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("{} created successfully", kind),
            key: account.profile,
        })),
    ))
}

/// POST /customers/create (public self-registration)
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<CustomerPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register_profile(&state, RoleKind::Customer, payload.customer).await
}

/// POST /analysts/create
pub async fn create_analyst(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<AnalystPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register_profile(&state, RoleKind::Analyst, payload.analyst).await
}

/// POST /admins/create
pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<AdminPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register_profile(&state, RoleKind::Admin, payload.admin).await
}

// ============ Companies ============

/// POST /companies/create
pub async fn create_company(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<CompanyPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let fields = payload.company.ok_or_else(|| {
        AppError::BadRequest("Request body must contain a 'company' object".to_string())
    })?;

    let company = state.accounts.create_company(parse_company(fields)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Company created successfully",
            "company": CompanyView::from(company),
        })),
    ))
}

/// GET /companies
pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let page = Page::from(query);
    let (companies, total) = state.accounts.companies(page).await?;
    let companies: Vec<CompanyView> = companies.into_iter().map(CompanyView::from).collect();

    Ok(Json(json!({
        "companies": companies,
        "info": page.info(total),
    })))
}

/// GET /companies/:id
pub async fn get_company(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Company")?;
    let company = state.accounts.company(id).await?;
    Ok(Json(json!({ "company": CompanyView::from(company) })))
}

// ============ Analysis requests ============

/// POST /requests/create
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppJson(payload): AppJson<CreateRequestPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let fields = payload.analysis_request.unwrap_or_default();
    let (Some(customer_id), Some(company_id), Some(motive)) =
        (fields.customer_id, fields.company_id, fields.motive)
    else {
        return Err(AppError::BadRequest(
            "To create an analysis request is necessary to send customerID, companyID and motive"
                .to_string(),
        ));
    };

    let request = state
        .lifecycle
        .create(&principal.role, customer_id, company_id, &motive)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Analysis requested successfully",
            "analysisRequest": request,
        })),
    ))
}

/// GET /requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let page = Page::from(query);
    let (requests, total) = state.lifecycle.list(&principal.role, page).await?;

    Ok(Json(json!({
        "requests": requests,
        "info": page.info(total),
    })))
}

/// GET /requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis request")?;
    let request = state.lifecycle.get(&principal.role, id).await?;
    Ok(Json(json!({ "analysisRequest": request })))
}

/// PATCH /requests/:id
///
/// Approval answers with the created analysis as well.
pub async fn update_request(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    AppJson(payload): AppJson<TransitionPayload>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis request")?;
    let target = payload
        .analysis_request
        .and_then(|fields| fields.status)
        .ok_or_else(|| {
            AppError::BadRequest(
                "To update an analysis request is necessary to send its status".to_string(),
            )
        })?;

    let transition = state.lifecycle.transition(&principal.role, id, target).await?;

    let mut body = json!({
        "message": "Analysis request updated successfully",
        "analysisRequest": transition.request,
    });
    if let Some(analysis) = transition.analysis {
        body["analysis"] = json!(analysis);
    }
    Ok(Json(body))
}

/// DELETE /requests/:id
pub async fn delete_request(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis request")?;
    state.lifecycle.delete(&principal.role, id).await?;
    Ok(Json(json!({
        "message": "Analysis request deleted successfully"
    })))
}

// ============ Analyses ============

/// GET /analyzes
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let page = Page::from(query);
    let (analyses, total) = state.scoring.list(page).await?;

    Ok(Json(json!({
        "analyzes": analyses,
        "info": page.info(total),
    })))
}

/// GET /analyzes/:id
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis")?;
    let analysis = state.scoring.get(id).await?;
    Ok(Json(json!({ "analysis": analysis })))
}

/// PATCH /analyzes/:id
pub async fn update_analysis(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateAnalysisPayload>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis")?;
    let update = ScoreUpdate::try_from(payload.analysis.unwrap_or_default())?;

    let analysis = state
        .scoring
        .update_scores(&principal.role, id, update)
        .await?;

    Ok(Json(json!({
        "message": "Analysis updated successfully",
        "analysis": analysis,
    })))
}

/// DELETE /analyzes/:id
pub async fn delete_analysis(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id, "Analysis")?;
    state.scoring.delete(&principal.role, id).await?;
    Ok(Json(json!({ "message": "Analysis deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_id_is_not_found() {
        let err = parse_id("not-a-uuid", "Company").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(parse_id(&Uuid::new_v4().to_string(), "Company").is_ok());
    }
}
