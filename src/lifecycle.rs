//! Analysis-request lifecycle.
//!
//! ```text
//! InAnalysis ──► Approved   (assigns an analyst, creates the Analysis)
//!            └─► Reproved
//! ```
//!
//! Both targets are terminal; a decided request never moves again.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::assignment::AnalystPicker;
use crate::errors::AppError;
use crate::models::{
    Analysis, AnalysisRequest, AnalysisStatus, NewAnalysis, NewAnalysisRequest, RequestStatus,
    Role, RoleKind,
};
use crate::pagination::Page;
use crate::store::Store;

/// Result of a successful status transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub request: AnalysisRequest,
    /// Present only for approvals.
    pub analysis: Option<Analysis>,
}

/// Validates a status change without touching storage.
pub fn check_transition(from: RequestStatus, to: RequestStatus) -> Result<(), AppError> {
    if to == RequestStatus::InAnalysis {
        return Err(AppError::BadRequest(
            "Status must be either Approved or Reproved".to_string(),
        ));
    }
    if from.is_decided() {
        return Err(AppError::InvalidState(format!(
            "Analysis request was already {}",
            from
        )));
    }
    Ok(())
}

pub struct RequestLifecycle {
    store: Arc<dyn Store>,
    picker: Arc<AnalystPicker>,
}

impl RequestLifecycle {
    pub fn new(store: Arc<dyn Store>, picker: Arc<AnalystPicker>) -> Self {
        Self { store, picker }
    }

    /// Opens a request on behalf of `customer_id`.
    pub async fn create(
        &self,
        caller: &Role,
        customer_id: Uuid,
        company_id: Uuid,
        motive: &str,
    ) -> Result<AnalysisRequest, AppError> {
        let motive = motive.trim();
        if motive.is_empty() {
            return Err(AppError::BadRequest(
                "To create an analysis request is necessary to send customerID, companyID and motive"
                    .to_string(),
            ));
        }

        if *caller != Role::Customer(customer_id) {
            return Err(AppError::Forbidden(
                "Analysis requests can only be opened for your own customer account".to_string(),
            ));
        }

        let customer = self.store.find_profile(customer_id).await?;
        if !matches!(customer, Some(ref p) if p.kind == RoleKind::Customer) {
            return Err(AppError::NotFound("Customer not found".to_string()));
        }

        if self.store.find_company(company_id).await?.is_none() {
            return Err(AppError::NotFound("Company not found".to_string()));
        }

        self.ensure_no_open_engagement(customer_id, company_id)
            .await?;

        let request = self
            .store
            .insert_request(NewAnalysisRequest {
                customer_id,
                company_id,
                motive: motive.to_string(),
                request_date: Utc::now(),
            })
            .await?;

        tracing::info!(
            "Analysis request {} opened by customer {} for company {}",
            request.id,
            customer_id,
            company_id
        );
        Ok(request)
    }

    /// Rejects a new request while the pair has one under review, or an approved
    /// one whose analysis is not yet Completed.
    async fn ensure_no_open_engagement(
        &self,
        customer_id: Uuid,
        company_id: Uuid,
    ) -> Result<(), AppError> {
        for existing in self
            .store
            .requests_for_pair(customer_id, company_id)
            .await?
        {
            match existing.status {
                RequestStatus::InAnalysis => {
                    return Err(AppError::Conflict(
                        "There is already an analysis request in analysis for this company"
                            .to_string(),
                    ));
                }
                RequestStatus::Approved => {
                    let analysis = self.store.find_analysis_by_request(existing.id).await?;
                    if matches!(analysis, Some(ref a) if a.status != AnalysisStatus::Completed) {
                        return Err(AppError::Conflict(
                            "This company is still being analyzed for a previous request"
                                .to_string(),
                        ));
                    }
                }
                RequestStatus::Reproved => {}
            }
        }
        Ok(())
    }

    /// Decides a pending request. Approval assigns a random analyst and creates
    /// the analysis in the same unit as the status change.
    pub async fn transition(
        &self,
        caller: &Role,
        request_id: Uuid,
        target: RequestStatus,
    ) -> Result<Transition, AppError> {
        let current = self.find_visible(caller, request_id).await?;
        check_transition(current.status, target)?;

        match target {
            RequestStatus::Approved => {
                // An empty pool fails here, before anything is written.
                let analyst_id = self.picker.pick().await?;
                let (request, analysis) = self
                    .store
                    .approve_request(
                        request_id,
                        NewAnalysis {
                            request_id,
                            company_id: current.company_id,
                            analyst_id,
                            created_at: Utc::now(),
                        },
                    )
                    .await?;

                tracing::info!(
                    "Analysis request {} approved; analysis {} assigned to analyst {}",
                    request.id,
                    analysis.id,
                    analyst_id
                );
                Ok(Transition {
                    request,
                    analysis: Some(analysis),
                })
            }
            // check_transition has already ruled out InAnalysis
            RequestStatus::Reproved | RequestStatus::InAnalysis => {
                let request = self.store.reprove_request(request_id).await?;
                tracing::info!("Analysis request {} reproved", request.id);
                Ok(Transition {
                    request,
                    analysis: None,
                })
            }
        }
    }

    /// Removes a request. Any analysis created from it is left in place. An
    /// approved request cannot go while its analysis is still open.
    pub async fn delete(&self, caller: &Role, request_id: Uuid) -> Result<(), AppError> {
        let request = self.find_visible(caller, request_id).await?;

        if request.status == RequestStatus::Approved {
            let analysis = self.store.find_analysis_by_request(request_id).await?;
            if matches!(analysis, Some(ref a) if a.status != AnalysisStatus::Completed) {
                return Err(AppError::Conflict(
                    "This request cannot be deleted while its analysis is not Completed"
                        .to_string(),
                ));
            }
        }

        if !self.store.delete_request(request_id).await? {
            return Err(AppError::NotFound("Analysis request not found".to_string()));
        }
        tracing::info!(
            "Analysis request {} deleted by {} {}",
            request_id,
            caller.kind(),
            caller.id()
        );
        Ok(())
    }

    pub async fn get(&self, caller: &Role, request_id: Uuid) -> Result<AnalysisRequest, AppError> {
        self.find_visible(caller, request_id).await
    }

    /// Analysts see every request; customers see their own.
    pub async fn list(
        &self,
        caller: &Role,
        page: Page,
    ) -> Result<(Vec<AnalysisRequest>, u64), AppError> {
        let scope = match caller {
            Role::Analyst(_) => None,
            Role::Customer(id) => Some(*id),
            Role::Admin(_) => return Err(forbidden()),
        };
        self.store.list_requests(scope, page).await
    }

    /// Loads a request and applies row-level ownership: customers may only
    /// reach their own requests, analysts reach all of them.
    async fn find_visible(
        &self,
        caller: &Role,
        request_id: Uuid,
    ) -> Result<AnalysisRequest, AppError> {
        let request = self
            .store
            .find_request(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Analysis request not found".to_string()))?;

        match caller {
            Role::Analyst(_) => Ok(request),
            Role::Customer(id) if *id == request.customer_id => Ok(request),
            _ => Err(forbidden()),
        }
    }
}

fn forbidden() -> AppError {
    AppError::Forbidden(
        "You do not have the necessary permissions to access this analysis request".to_string(),
    )
}
