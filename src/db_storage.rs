use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    Account, Address, Analysis, AnalysisRequest, Company, NewAccount, NewAnalysis,
    NewAnalysisRequest, NewCompany, Profile, RequestStatus, User,
};
use crate::pagination::Page;
use crate::scoring::ScoreUpdate;
use crate::store::Store;

const PROFILE_COLUMNS: &str = "id, user_id, kind, name, cpf, created_at";
const COMPANY_COLUMNS: &str = "id, name, industry, cnpj, hq_street, hq_city, hq_state, \
     hq_postal_code, hq_country, score, created_at";
const REQUEST_COLUMNS: &str = "id, customer_id, company_id, motive, status, request_date";
const ANALYSIS_COLUMNS: &str = "id, request_id, company_id, analyst_id, \
     firm_level_claim_score, firm_level_executional_score, ascore, status, created_at, \
     analysis_date";

// ============ Row types ============

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    name: Option<String>,
    cpf: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            name: row.name,
            cpf: row.cpf,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CompanyRow {
    id: Uuid,
    name: String,
    industry: String,
    cnpj: String,
    hq_street: String,
    hq_city: String,
    hq_state: String,
    hq_postal_code: String,
    hq_country: String,
    score: f64,
    created_at: DateTime<Utc>,
}

impl From<CompanyRow> for Company {
    fn from(row: CompanyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            industry: row.industry,
            cnpj: row.cnpj,
            headquarters_location: Address {
                street: row.hq_street,
                city: row.hq_city,
                state: row.hq_state,
                postal_code: row.hq_postal_code,
                country: row.hq_country,
            },
            score: row.score,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    customer_id: Uuid,
    company_id: Uuid,
    motive: String,
    status: String,
    request_date: DateTime<Utc>,
}

impl TryFrom<RequestRow> for AnalysisRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            company_id: row.company_id,
            motive: row.motive,
            status: row.status.parse()?,
            request_date: row.request_date,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: Uuid,
    request_id: Uuid,
    company_id: Uuid,
    analyst_id: Uuid,
    firm_level_claim_score: f64,
    firm_level_executional_score: f64,
    ascore: f64,
    status: String,
    created_at: DateTime<Utc>,
    analysis_date: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for Analysis {
    type Error = AppError;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            company_id: row.company_id,
            analyst_id: row.analyst_id,
            firm_level_claim_score: row.firm_level_claim_score,
            firm_level_executional_score: row.firm_level_executional_score,
            ascore: row.ascore,
            status: row.status.parse()?,
            created_at: row.created_at,
            analysis_date: row.analysis_date,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn total(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn limit_offset(page: Page) -> (i64, i64) {
    (
        i64::from(page.size),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

// ============ Store ============

/// Postgres-backed [`Store`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Shared by approval and reproval: locks the row and checks it is still pending.
    async fn lock_pending_request(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
    ) -> Result<(), AppError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM analysis_requests WHERE id = $1 FOR UPDATE",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Analysis request not found".to_string()))?;

        let current = AnalysisRequest::try_from(row)?;
        if current.status.is_decided() {
            return Err(AppError::InvalidState(format!(
                "Analysis request was already {}",
                current.status
            )));
        }
        Ok(())
    }

    async fn set_request_status(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<AnalysisRequest, AppError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "UPDATE analysis_requests SET status = $2 WHERE id = $1 RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .bind(status.as_db_str())
        .fetch_one(&mut **tx)
        .await?;
        AnalysisRequest::try_from(row)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<Profile>, AppError> {
        sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {} FROM profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Profile::try_from)
        .transpose()
    }

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError> {
        sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Profile::try_from)
        .transpose()
    }

    async fn cpf_in_use(&self, cpf: &str) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM profiles WHERE cpf = $1)")
                .bind(cpf)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&account.email)
        .bind(&account.password_hash)
        .fetch_one(&mut *tx)
        .await
        .context("inserting user")?;

        let profile = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO profiles (id, user_id, kind, name, cpf) VALUES ($1, $2, $3, $4, $5) \
             RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(account.profile.kind().as_db_str())
        .bind(account.profile.name())
        .bind(account.profile.cpf())
        .fetch_one(&mut *tx)
        .await
        .context("inserting profile")?;

        tx.commit().await?;

        Ok(Account {
            user: User::from(user),
            profile: Profile::try_from(profile)?,
        })
    }

    async fn analyst_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM profiles WHERE kind = 'analyst' ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn replace_refresh_token(&self, user_id: Uuid, digest: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO active_refresh_tokens (user_id, token_digest)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET token_digest = EXCLUDED.token_digest, issued_at = now()
            "#,
        )
        .bind(user_id)
        .bind(digest)
        .execute(&self.pool)
        .await
        .context("storing refresh token")?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: Uuid,
        current: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE active_refresh_tokens
            SET token_digest = $3, issued_at = now()
            WHERE user_id = $1 AND token_digest = $2
            "#,
        )
        .bind(user_id)
        .bind(current)
        .bind(replacement)
        .execute(&self.pool)
        .await
        .context("rotating refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_token(&self, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM active_refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_company(&self, company: NewCompany) -> Result<Company, AppError> {
        let location = &company.headquarters_location;
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "INSERT INTO companies (id, name, industry, cnpj, hq_street, hq_city, hq_state, \
             hq_postal_code, hq_country) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {}",
            COMPANY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&company.name)
        .bind(&company.industry)
        .bind(&company.cnpj)
        .bind(&location.street)
        .bind(&location.city)
        .bind(&location.state)
        .bind(&location.postal_code)
        .bind(&location.country)
        .fetch_one(&self.pool)
        .await
        .context("inserting company")?;
        Ok(Company::from(row))
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, AppError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {} FROM companies WHERE id = $1",
            COMPANY_COLUMNS
        ))
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Company::from))
    }

    async fn list_companies(&self, page: Page) -> Result<(Vec<Company>, u64), AppError> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {} FROM companies ORDER BY name, id LIMIT $1 OFFSET $2",
            COMPANY_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;
        Ok((rows.into_iter().map(Company::from).collect(), total(count)))
    }

    async fn insert_request(
        &self,
        request: NewAnalysisRequest,
    ) -> Result<AnalysisRequest, AppError> {
        // The partial unique index on pending pairs turns a racing duplicate into Conflict.
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "INSERT INTO analysis_requests (id, customer_id, company_id, motive, status, \
             request_date) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(request.customer_id)
        .bind(request.company_id)
        .bind(&request.motive)
        .bind(RequestStatus::InAnalysis.as_db_str())
        .bind(request.request_date)
        .fetch_one(&self.pool)
        .await
        .context("inserting analysis request")?;
        AnalysisRequest::try_from(row)
    }

    async fn find_request(&self, request_id: Uuid) -> Result<Option<AnalysisRequest>, AppError> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM analysis_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?
        .map(AnalysisRequest::try_from)
        .transpose()
    }

    async fn requests_for_pair(
        &self,
        customer_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<AnalysisRequest>, AppError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM analysis_requests WHERE customer_id = $1 AND company_id = $2",
            REQUEST_COLUMNS
        ))
        .bind(customer_id)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_requests(
        &self,
        customer_id: Option<Uuid>,
        page: Page,
    ) -> Result<(Vec<AnalysisRequest>, u64), AppError> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM analysis_requests \
             WHERE $1::uuid IS NULL OR customer_id = $1 \
             ORDER BY request_date DESC, id LIMIT $2 OFFSET $3",
            REQUEST_COLUMNS
        ))
        .bind(customer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM analysis_requests WHERE $1::uuid IS NULL OR customer_id = $1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((convert_all(rows)?, total(count)))
    }

    async fn approve_request(
        &self,
        request_id: Uuid,
        analysis: NewAnalysis,
    ) -> Result<(AnalysisRequest, Analysis), AppError> {
        let mut tx = self.pool.begin().await?;

        Self::lock_pending_request(&mut tx, request_id).await?;
        let request = Self::set_request_status(&mut tx, request_id, RequestStatus::Approved).await?;

        let initial = analysis.into_analysis(Uuid::new_v4());
        // analyses.request_id is unique: a second analysis for the request is a Conflict.
        let row = sqlx::query_as::<_, AnalysisRow>(&format!(
            "INSERT INTO analyses (id, request_id, company_id, analyst_id, \
             firm_level_claim_score, firm_level_executional_score, ascore, status, created_at, \
             analysis_date) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            ANALYSIS_COLUMNS
        ))
        .bind(initial.id)
        .bind(initial.request_id)
        .bind(initial.company_id)
        .bind(initial.analyst_id)
        .bind(initial.firm_level_claim_score)
        .bind(initial.firm_level_executional_score)
        .bind(initial.ascore)
        .bind(initial.status.as_db_str())
        .bind(initial.created_at)
        .bind(initial.analysis_date)
        .fetch_one(&mut *tx)
        .await
        .context("inserting analysis")?;
        let analysis = Analysis::try_from(row)?;

        tx.commit().await?;
        Ok((request, analysis))
    }

    async fn reprove_request(&self, request_id: Uuid) -> Result<AnalysisRequest, AppError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_pending_request(&mut tx, request_id).await?;
        let request = Self::set_request_status(&mut tx, request_id, RequestStatus::Reproved).await?;
        tx.commit().await?;
        Ok(request)
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM analysis_requests WHERE id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_analysis(&self, analysis_id: Uuid) -> Result<Option<Analysis>, AppError> {
        sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses WHERE id = $1",
            ANALYSIS_COLUMNS
        ))
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Analysis::try_from)
        .transpose()
    }

    async fn find_analysis_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Analysis>, AppError> {
        sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses WHERE request_id = $1",
            ANALYSIS_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Analysis::try_from)
        .transpose()
    }

    async fn list_analyses(&self, page: Page) -> Result<(Vec<Analysis>, u64), AppError> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses ORDER BY analysis_date DESC, id LIMIT $1 OFFSET $2",
            ANALYSIS_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses")
            .fetch_one(&self.pool)
            .await?;
        Ok((convert_all(rows)?, total(count)))
    }

    async fn update_analysis(
        &self,
        analysis_id: Uuid,
        update: &ScoreUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Analysis>, AppError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, AnalysisRow>(&format!(
            "SELECT {} FROM analyses WHERE id = $1 FOR UPDATE",
            ANALYSIS_COLUMNS
        ))
        .bind(analysis_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let mut analysis = Analysis::try_from(row)?;
        update.apply_to(&mut analysis, now);

        sqlx::query(
            r#"
            UPDATE analyses
            SET firm_level_claim_score = $2,
                firm_level_executional_score = $3,
                ascore = $4,
                status = $5,
                analysis_date = $6
            WHERE id = $1
            "#,
        )
        .bind(analysis.id)
        .bind(analysis.firm_level_claim_score)
        .bind(analysis.firm_level_executional_score)
        .bind(analysis.ascore)
        .bind(analysis.status.as_db_str())
        .bind(analysis.analysis_date)
        .execute(&mut *tx)
        .await
        .context("updating analysis")?;

        if update.touches_scores() {
            let result = sqlx::query("UPDATE companies SET score = $2 WHERE id = $1")
                .bind(analysis.company_id)
                .bind(analysis.ascore)
                .execute(&mut *tx)
                .await
                .context("propagating ascore to company")?;
            if result.rows_affected() == 0 {
                tracing::warn!(
                    "Company {} of analysis {} no longer exists; score not propagated",
                    analysis.company_id,
                    analysis.id
                );
            }
        }

        tx.commit().await?;
        Ok(Some(analysis))
    }

    async fn delete_analysis(&self, analysis_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM analyses WHERE id = $1")
            .bind(analysis_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
