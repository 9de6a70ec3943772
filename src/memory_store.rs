//! In-process [`Store`] used by the test suite and for running without Postgres.
//!
//! One `RwLock` guards every collection, so each trait call is atomic with
//! respect to every other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Account, Analysis, AnalysisRequest, Company, NewAccount, NewAnalysis, NewAnalysisRequest,
    NewCompany, Profile, RequestStatus, RoleKind, User,
};
use crate::pagination::Page;
use crate::scoring::ScoreUpdate;
use crate::store::Store;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, Profile>,
    /// user id -> refresh token digest
    refresh_tokens: HashMap<Uuid, String>,
    companies: HashMap<Uuid, Company>,
    requests: HashMap<Uuid, AnalysisRequest>,
    analyses: HashMap<Uuid, Analysis>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paged<T: Clone>(
    mut items: Vec<T>,
    page: Page,
    order: impl FnMut(&T, &T) -> std::cmp::Ordering,
) -> (Vec<T>, u64) {
    items.sort_by(order);
    let total = items.len() as u64;
    (page.slice(&items), total)
}

fn decide(
    tables: &mut Tables,
    request_id: Uuid,
    status: RequestStatus,
) -> Result<AnalysisRequest, AppError> {
    let request = tables
        .requests
        .get_mut(&request_id)
        .ok_or_else(|| AppError::NotFound("Analysis request not found".to_string()))?;
    if request.status.is_decided() {
        return Err(AppError::InvalidState(format!(
            "Analysis request was already {}",
            request.status
        )));
    }
    request.status = status;
    Ok(request.clone())
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<Profile>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError> {
        Ok(self.tables.read().await.profiles.get(&profile_id).cloned())
    }

    async fn cpf_in_use(&self, cpf: &str) -> Result<bool, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .any(|p| p.cpf.as_deref() == Some(cpf)))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError> {
        let mut tables = self.tables.write().await;

        if tables.users.values().any(|u| u.email == account.email) {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }
        if let Some(cpf) = account.profile.cpf() {
            if tables.profiles.values().any(|p| p.cpf.as_deref() == Some(cpf)) {
                return Err(AppError::Conflict(
                    "An analyst or customer with this cpf already exists".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: account.email,
            password_hash: account.password_hash,
            created_at: now,
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: user.id,
            kind: account.profile.kind(),
            name: account.profile.name().map(str::to_string),
            cpf: account.profile.cpf().map(str::to_string),
            created_at: now,
        };

        tables.users.insert(user.id, user.clone());
        tables.profiles.insert(profile.id, profile.clone());
        Ok(Account { user, profile })
    }

    async fn analyst_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let tables = self.tables.read().await;
        let mut analysts: Vec<&Profile> = tables
            .profiles
            .values()
            .filter(|p| p.kind == RoleKind::Analyst)
            .collect();
        analysts.sort_by_key(|p| (p.created_at, p.id));
        Ok(analysts.into_iter().map(|p| p.id).collect())
    }

    async fn replace_refresh_token(&self, user_id: Uuid, digest: &str) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables.refresh_tokens.insert(user_id, digest.to_string());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        current: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(&user_id) {
            Some(stored) if stored == current => {
                *stored = replacement.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_token(&self, user_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.refresh_tokens.remove(&user_id).is_some())
    }

    async fn create_company(&self, company: NewCompany) -> Result<Company, AppError> {
        let mut tables = self.tables.write().await;
        if tables.companies.values().any(|c| c.cnpj == company.cnpj) {
            return Err(AppError::Conflict(
                "A company with this cnpj already exists".to_string(),
            ));
        }

        let company = Company {
            id: Uuid::new_v4(),
            name: company.name,
            industry: company.industry,
            cnpj: company.cnpj,
            headquarters_location: company.headquarters_location,
            score: 0.0,
            created_at: Utc::now(),
        };
        tables.companies.insert(company.id, company.clone());
        Ok(company)
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, AppError> {
        Ok(self.tables.read().await.companies.get(&company_id).cloned())
    }

    async fn list_companies(&self, page: Page) -> Result<(Vec<Company>, u64), AppError> {
        let tables = self.tables.read().await;
        let companies = tables.companies.values().cloned().collect();
        Ok(paged(companies, page, |a, b| {
            a.name.cmp(&b.name).then(a.id.cmp(&b.id))
        }))
    }

    async fn insert_request(
        &self,
        request: NewAnalysisRequest,
    ) -> Result<AnalysisRequest, AppError> {
        let mut tables = self.tables.write().await;
        let pending = tables.requests.values().any(|r| {
            r.customer_id == request.customer_id
                && r.company_id == request.company_id
                && r.status == RequestStatus::InAnalysis
        });
        if pending {
            return Err(AppError::Conflict(
                "There is already an analysis request in analysis for this company".to_string(),
            ));
        }

        let request = AnalysisRequest {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            company_id: request.company_id,
            motive: request.motive,
            status: RequestStatus::InAnalysis,
            request_date: request.request_date,
        };
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_request(&self, request_id: Uuid) -> Result<Option<AnalysisRequest>, AppError> {
        Ok(self.tables.read().await.requests.get(&request_id).cloned())
    }

    async fn requests_for_pair(
        &self,
        customer_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<AnalysisRequest>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .values()
            .filter(|r| r.customer_id == customer_id && r.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn list_requests(
        &self,
        customer_id: Option<Uuid>,
        page: Page,
    ) -> Result<(Vec<AnalysisRequest>, u64), AppError> {
        let tables = self.tables.read().await;
        let requests = tables
            .requests
            .values()
            .filter(|r| customer_id.map_or(true, |id| r.customer_id == id))
            .cloned()
            .collect();
        Ok(paged(requests, page, |a, b| {
            b.request_date.cmp(&a.request_date).then(a.id.cmp(&b.id))
        }))
    }

    async fn approve_request(
        &self,
        request_id: Uuid,
        analysis: NewAnalysis,
    ) -> Result<(AnalysisRequest, Analysis), AppError> {
        let mut tables = self.tables.write().await;

        // Validate everything before the first write so a failure leaves no trace.
        match tables.requests.get(&request_id) {
            None => return Err(AppError::NotFound("Analysis request not found".to_string())),
            Some(r) if r.status.is_decided() => {
                return Err(AppError::InvalidState(format!(
                    "Analysis request was already {}",
                    r.status
                )))
            }
            Some(_) => {}
        }
        if tables.analyses.values().any(|a| a.request_id == request_id) {
            return Err(AppError::Conflict(
                "An analysis already exists for this request".to_string(),
            ));
        }

        let request = decide(&mut tables, request_id, RequestStatus::Approved)?;
        let analysis = analysis.into_analysis(Uuid::new_v4());
        tables.analyses.insert(analysis.id, analysis.clone());
        Ok((request, analysis))
    }

    async fn reprove_request(&self, request_id: Uuid) -> Result<AnalysisRequest, AppError> {
        let mut tables = self.tables.write().await;
        decide(&mut tables, request_id, RequestStatus::Reproved)
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.requests.remove(&request_id).is_some())
    }

    async fn find_analysis(&self, analysis_id: Uuid) -> Result<Option<Analysis>, AppError> {
        Ok(self.tables.read().await.analyses.get(&analysis_id).cloned())
    }

    async fn find_analysis_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Analysis>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .values()
            .find(|a| a.request_id == request_id)
            .cloned())
    }

    async fn list_analyses(&self, page: Page) -> Result<(Vec<Analysis>, u64), AppError> {
        let tables = self.tables.read().await;
        let analyses = tables.analyses.values().cloned().collect();
        Ok(paged(analyses, page, |a, b| {
            b.analysis_date.cmp(&a.analysis_date).then(a.id.cmp(&b.id))
        }))
    }

    async fn update_analysis(
        &self,
        analysis_id: Uuid,
        update: &ScoreUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Analysis>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(analysis) = tables.analyses.get_mut(&analysis_id) else {
            return Ok(None);
        };
        update.apply_to(analysis, now);
        let updated = analysis.clone();

        if update.touches_scores() {
            match tables.companies.get_mut(&updated.company_id) {
                Some(company) => company.score = updated.ascore,
                None => tracing::warn!(
                    "Company {} of analysis {} no longer exists; score not propagated",
                    updated.company_id,
                    updated.id
                ),
            }
        }
        Ok(Some(updated))
    }

    async fn delete_analysis(&self, analysis_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.analyses.remove(&analysis_id).is_some())
    }
}
