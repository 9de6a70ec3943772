//! Persistence boundary.
//!
//! The domain services talk to storage only through [`Store`]. Each method that
//! mutates more than one row is a single atomic unit in every implementation:
//! a SQL transaction in [`crate::db_storage::PgStore`], one write-lock section in
//! [`crate::memory_store::MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Account, Analysis, AnalysisRequest, Company, NewAccount, NewAnalysis, NewAnalysisRequest,
    NewCompany, Profile, User,
};
use crate::pagination::Page;
use crate::scoring::ScoreUpdate;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Accounts ─────────────────────────────────────────────────────────────

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Lookup by normalized (lowercased) email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Profile owned by `user_id`, if any.
    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<Profile>, AppError>;

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError>;

    /// Whether any Analyst or Customer profile already holds `cpf`.
    async fn cpf_in_use(&self, cpf: &str) -> Result<bool, AppError>;

    /// Inserts the user and its profile together.
    ///
    /// Returns `Conflict` if the email, the cpf, or the user's profile slot is taken.
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError>;

    /// Ids of every Analyst profile, in a stable order.
    async fn analyst_ids(&self) -> Result<Vec<Uuid>, AppError>;

    // ── Refresh tokens ───────────────────────────────────────────────────────

    /// Upserts the single active refresh-token digest for `user_id`.
    async fn replace_refresh_token(&self, user_id: Uuid, digest: &str) -> Result<(), AppError>;

    /// Compare-and-swap: replaces `current` with `replacement` only if `current`
    /// is the stored digest. Returns `false` when it is not.
    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        current: &str,
        replacement: &str,
    ) -> Result<bool, AppError>;

    /// Drops the active refresh token. Returns `false` if none was stored.
    async fn revoke_refresh_token(&self, user_id: Uuid) -> Result<bool, AppError>;

    // ── Companies ────────────────────────────────────────────────────────────

    /// Returns `Conflict` on duplicate cnpj.
    async fn create_company(&self, company: NewCompany) -> Result<Company, AppError>;

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, AppError>;

    async fn list_companies(&self, page: Page) -> Result<(Vec<Company>, u64), AppError>;

    // ── Analysis requests ────────────────────────────────────────────────────

    /// Inserts a request in `InAnalysis`.
    ///
    /// Returns `Conflict` if another `InAnalysis` request exists for the same
    /// (customer, company) pair at insert time.
    async fn insert_request(&self, request: NewAnalysisRequest)
        -> Result<AnalysisRequest, AppError>;

    async fn find_request(&self, request_id: Uuid) -> Result<Option<AnalysisRequest>, AppError>;

    /// Every request for the (customer, company) pair, any status.
    async fn requests_for_pair(
        &self,
        customer_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<AnalysisRequest>, AppError>;

    /// Newest first. `customer_id` restricts the listing to one customer.
    async fn list_requests(
        &self,
        customer_id: Option<Uuid>,
        page: Page,
    ) -> Result<(Vec<AnalysisRequest>, u64), AppError>;

    /// Moves an `InAnalysis` request to `Approved` and inserts its analysis.
    ///
    /// Fails with `NotFound` if the request is gone, `InvalidState` if it is no
    /// longer `InAnalysis`, and `Conflict` if an analysis already references it.
    /// Nothing is persisted on failure.
    async fn approve_request(
        &self,
        request_id: Uuid,
        analysis: NewAnalysis,
    ) -> Result<(AnalysisRequest, Analysis), AppError>;

    /// Moves an `InAnalysis` request to `Reproved`. Same failure modes as
    /// [`Store::approve_request`] minus the analysis conflict.
    async fn reprove_request(&self, request_id: Uuid) -> Result<AnalysisRequest, AppError>;

    /// Returns `false` if the request did not exist. Never touches analyses.
    async fn delete_request(&self, request_id: Uuid) -> Result<bool, AppError>;

    // ── Analyses ─────────────────────────────────────────────────────────────

    async fn find_analysis(&self, analysis_id: Uuid) -> Result<Option<Analysis>, AppError>;

    async fn find_analysis_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Analysis>, AppError>;

    /// Newest `analysis_date` first.
    async fn list_analyses(&self, page: Page) -> Result<(Vec<Analysis>, u64), AppError>;

    /// Applies `update` to the stored analysis and, when it touches a score,
    /// writes the new ascore into the owning company, all in one unit.
    /// Returns `None` if the analysis does not exist.
    async fn update_analysis(
        &self,
        analysis_id: Uuid,
        update: &ScoreUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Analysis>, AppError>;

    /// Returns `false` if the analysis did not exist.
    async fn delete_analysis(&self, analysis_id: Uuid) -> Result<bool, AppError>;
}
